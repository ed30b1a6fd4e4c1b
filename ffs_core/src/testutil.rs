//! Test utilities for `Datastore` implementations.
//!
//! This module provides a test suite that can be run against any
//! `Datastore` implementation to verify it honors the trait contract.
//!
//! # Usage
//!
//! In your datastore crate's `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! ffs_core = { workspace = true, features = ["testutil"] }
//! ```
//!
//! In your test file:
//!
//! ```ignore
//! use ffs_core::testutil::DatastoreTests;
//!
//! #[tokio::test]
//! async fn test_my_datastore() {
//!     let ds = MyDatastore::new(...);
//!     DatastoreTests::new(&ds).run_all().await.unwrap();
//! }
//! ```

use crate::datastore::{Datastore, DatastoreError, DatastoreResult};
use crate::key::Key;
use bytes::Bytes;
use futures::TryStreamExt;
use rand::Rng;

/// Conformance suite for `Datastore` implementations.
pub struct DatastoreTests<'a, D: ?Sized> {
    ds: &'a D,
    /// Prefix for test keys to avoid conflicts
    prefix: Key,
}

impl<'a, D: Datastore + ?Sized> DatastoreTests<'a, D> {
    /// Create a new test suite for the given datastore.
    pub fn new(ds: &'a D) -> Self {
        let prefix = Key::new(format!("/_test_{}", rand::rng().random::<u32>()));
        Self { ds, prefix }
    }

    /// Create a new test suite with a custom prefix.
    pub fn with_prefix(ds: &'a D, prefix: impl Into<Key>) -> Self {
        Self {
            ds,
            prefix: prefix.into(),
        }
    }

    fn key(&self, name: &str) -> Key {
        self.prefix.child(name)
    }

    /// Run every contract check except [`DatastoreTests::test_close`].
    pub async fn run_all(&self) -> DatastoreResult<()> {
        self.test_put_get().await?;
        self.test_not_found().await?;
        self.test_has().await?;
        self.test_overwrite().await?;
        self.test_delete().await?;
        self.test_query_prefix().await?;
        self.test_query_order().await?;

        self.cleanup().await?;

        Ok(())
    }

    /// Test basic put and get.
    pub async fn test_put_get(&self) -> DatastoreResult<()> {
        let key = self.key("put_get");
        let data = Bytes::from_static(b"hello, world!");

        self.ds.put(&key, data.clone()).await?;

        let retrieved = self.ds.get(&key).await?;
        assert_eq!(retrieved, data, "retrieved data should match original");

        Ok(())
    }

    /// Test that absent keys report `NotFound`.
    pub async fn test_not_found(&self) -> DatastoreResult<()> {
        let key = self.key("never_written");
        match self.ds.get(&key).await {
            Err(DatastoreError::NotFound) => Ok(()),
            Err(err) => Err(err),
            Ok(_) => panic!("get of an absent key should fail with NotFound"),
        }
    }

    /// Test existence checks.
    pub async fn test_has(&self) -> DatastoreResult<()> {
        let key = self.key("has");

        assert!(
            !self.ds.has(&key).await?,
            "key should not exist before creation"
        );

        self.ds.put(&key, Bytes::from_static(b"x")).await?;

        assert!(self.ds.has(&key).await?, "key should exist after creation");

        Ok(())
    }

    /// Test that put replaces an existing value.
    pub async fn test_overwrite(&self) -> DatastoreResult<()> {
        let key = self.key("overwrite");

        self.ds.put(&key, Bytes::from_static(b"first")).await?;
        self.ds.put(&key, Bytes::from_static(b"second")).await?;

        let retrieved = self.ds.get(&key).await?;
        assert_eq!(retrieved, Bytes::from_static(b"second"));

        Ok(())
    }

    /// Test delete, including deleting an absent key.
    pub async fn test_delete(&self) -> DatastoreResult<()> {
        let key = self.key("delete");

        self.ds.put(&key, Bytes::from_static(b"x")).await?;
        self.ds.delete(&key).await?;

        assert!(!self.ds.has(&key).await?, "key should be gone after delete");

        // deleting again is not an error
        self.ds.delete(&key).await?;

        Ok(())
    }

    /// Test that queries only return strict descendants of the prefix.
    pub async fn test_query_prefix(&self) -> DatastoreResult<()> {
        let base = self.key("q");
        let sibling = Key::new(format!("{}x", base));

        self.ds.put(&base, Bytes::from_static(b"self")).await?;
        self.ds.put(&base.child("a"), Bytes::from_static(b"a")).await?;
        self.ds
            .put(&base.child("b/deep"), Bytes::from_static(b"deep"))
            .await?;
        self.ds.put(&sibling, Bytes::from_static(b"sibling")).await?;
        self.ds
            .put(&sibling.child("c"), Bytes::from_static(b"c"))
            .await?;

        let entries: Vec<_> = self.ds.query(&base).await?.try_collect().await?;
        let keys: Vec<Key> = entries.iter().map(|e| e.key.clone()).collect();

        assert_eq!(
            keys,
            vec![base.child("a"), base.child("b/deep")],
            "query should return only descendants of the prefix"
        );
        assert_eq!(entries[1].value, Bytes::from_static(b"deep"));

        Ok(())
    }

    /// Test that queries yield keys in ascending order.
    pub async fn test_query_order(&self) -> DatastoreResult<()> {
        let base = self.key("order");
        for name in ["c", "a", "b", "aa"] {
            self.ds
                .put(&base.child(name), Bytes::from(name.to_owned()))
                .await?;
        }

        let entries: Vec<_> = self.ds.query(&base).await?.try_collect().await?;
        let names: Vec<&str> = entries.iter().map(|e| e.key.name()).collect();
        assert_eq!(names, vec!["a", "aa", "b", "c"]);

        Ok(())
    }

    /// Test that a closed datastore refuses further calls.
    ///
    /// This closes the datastore, so run it last.
    pub async fn test_close(&self) -> DatastoreResult<()> {
        self.ds.close().await?;

        match self.ds.get(&self.key("after_close")).await {
            Err(DatastoreError::Closed) => {}
            other => panic!("get after close should fail with Closed, got {other:?}"),
        }
        match self.ds.put(&self.key("after_close"), Bytes::new()).await {
            Err(DatastoreError::Closed) => {}
            other => panic!("put after close should fail with Closed, got {other:?}"),
        }

        Ok(())
    }

    /// Remove every key written by this suite.
    pub async fn cleanup(&self) -> DatastoreResult<()> {
        let entries: Vec<_> = self.ds.query(&self.prefix).await?.try_collect().await?;
        for entry in entries {
            self.ds.delete(&entry.key).await?;
        }
        Ok(())
    }
}
