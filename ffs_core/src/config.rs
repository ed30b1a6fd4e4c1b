//! Storage configuration model.
//!
//! A [`StorageConfig`] declares how a Cid should be stored in the hot
//! (IPFS) and cold (Filecoin) layers. It is persisted as JSON with
//! PascalCase field names. Each struct keeps the fields it doesn't model
//! in a flattened `extra` map, so reading a record and writing it back
//! never drops data written by a newer (or older) schema.

use serde::{Deserialize, Serialize};

/// Fields present in a persisted record that this crate doesn't model.
pub type Extra = serde_json::Map<String, serde_json::Value>;

/// Minimum deal duration in epochs (180 days of 30s epochs).
pub const MIN_DEAL_DURATION: i64 = 518_400;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("add timeout should be greater than 0 seconds, got {0}")]
    AddTimeout(i64),
    #[error("replication factor should be greater than zero, got {0}")]
    RepFactor(i64),
    #[error("deal duration should be at least {MIN_DEAL_DURATION}, got {0}")]
    DealDuration(i64),
    #[error("renew threshold should be positive, got {0}")]
    RenewThreshold(i64),
    #[error("invalid wallet address")]
    WalletAddress,
    #[error("hot storage should be enabled to enable renewals")]
    RenewWithoutHot,
}

/// Desired storage state of a Cid.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct StorageConfig {
    pub hot: HotConfig,
    pub cold: ColdConfig,
    /// Failed replicas should be replaced automatically.
    pub repairable: bool,
    #[serde(flatten)]
    pub extra: Extra,
}

/// Desired storage state in the hot layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct HotConfig {
    pub enabled: bool,
    /// Data missing from the hot layer may be fetched back from cold storage.
    pub allow_unfreeze: bool,
    /// Maximum attoFIL to pay for an unfreeze retrieval.
    pub unfreeze_max_price: u64,
    pub ipfs: IpfsConfig,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct IpfsConfig {
    /// Upper bound, in seconds, for fetching data into the IPFS node.
    pub add_timeout: i64,
    #[serde(flatten)]
    pub extra: Extra,
}

/// Desired storage state in the cold layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct ColdConfig {
    pub enabled: bool,
    pub filecoin: FilConfig,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct FilConfig {
    /// Number of active deals with distinct miners.
    pub rep_factor: i64,
    pub deal_min_duration: i64,
    pub excluded_miners: Option<Vec<String>>,
    pub trusted_miners: Option<Vec<String>>,
    pub country_codes: Option<Vec<String>>,
    pub renew: FilRenew,
    /// Wallet address paying for deals.
    pub addr: String,
    /// Maximum price per GiB per epoch, in attoFIL. Zero means unlimited.
    pub max_price: u64,
    pub fast_retrieval: bool,
    pub deal_start_offset: i64,
    pub verified_deal: bool,
    #[serde(flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct FilRenew {
    pub enabled: bool,
    /// Epochs before expiration at which renewal kicks in.
    pub threshold: i64,
    #[serde(flatten)]
    pub extra: Extra,
}

impl StorageConfig {
    pub fn is_repairable(&self) -> bool {
        self.repairable
    }

    pub fn is_renewable(&self) -> bool {
        self.cold.enabled && self.cold.filecoin.renew.enabled
    }

    /// Background repair or renewal loops care about this config.
    pub fn is_tracked(&self) -> bool {
        self.is_repairable() || self.is_renewable()
    }

    pub fn with_repairable(mut self, enabled: bool) -> Self {
        self.repairable = enabled;
        self
    }

    pub fn with_hot_enabled(mut self, enabled: bool) -> Self {
        self.hot.enabled = enabled;
        self
    }

    pub fn with_hot_ipfs_add_timeout(mut self, seconds: i64) -> Self {
        self.hot.ipfs.add_timeout = seconds;
        self
    }

    pub fn with_hot_allow_unfreeze(mut self, allow: bool) -> Self {
        self.hot.allow_unfreeze = allow;
        self
    }

    pub fn with_unfreeze_max_price(mut self, max_price: u64) -> Self {
        self.hot.unfreeze_max_price = max_price;
        self
    }

    pub fn with_cold_enabled(mut self, enabled: bool) -> Self {
        self.cold.enabled = enabled;
        self
    }

    pub fn with_cold_fil_rep_factor(mut self, rep_factor: i64) -> Self {
        self.cold.filecoin.rep_factor = rep_factor;
        self
    }

    pub fn with_cold_fil_deal_duration(mut self, duration: i64) -> Self {
        self.cold.filecoin.deal_min_duration = duration;
        self
    }

    pub fn with_cold_fil_renew(mut self, enabled: bool, threshold: i64) -> Self {
        self.cold.filecoin.renew.enabled = enabled;
        self.cold.filecoin.renew.threshold = threshold;
        self
    }

    pub fn with_cold_max_price(mut self, max_price: u64) -> Self {
        self.cold.filecoin.max_price = max_price;
        self
    }

    pub fn with_cold_addr(mut self, addr: impl Into<String>) -> Self {
        self.cold.filecoin.addr = addr.into();
        self
    }

    pub fn with_cold_fil_excluded_miners(mut self, miners: &[String]) -> Self {
        self.cold.filecoin.excluded_miners = Some(miners.to_vec());
        self
    }

    pub fn with_cold_fil_trusted_miners(mut self, miners: &[String]) -> Self {
        self.cold.filecoin.trusted_miners = Some(miners.to_vec());
        self
    }

    pub fn with_cold_fil_country_codes(mut self, codes: &[String]) -> Self {
        self.cold.filecoin.country_codes = Some(codes.to_vec());
        self
    }

    pub fn with_fast_retrieval(mut self, enabled: bool) -> Self {
        self.cold.filecoin.fast_retrieval = enabled;
        self
    }

    pub fn with_verified_deal(mut self, enabled: bool) -> Self {
        self.cold.filecoin.verified_deal = enabled;
        self
    }

    pub fn with_cold_start_deal_offset(mut self, offset: i64) -> Self {
        self.cold.filecoin.deal_start_offset = offset;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hot.enabled && self.hot.ipfs.add_timeout <= 0 {
            return Err(ConfigError::AddTimeout(self.hot.ipfs.add_timeout));
        }
        if self.cold.enabled {
            let fil = &self.cold.filecoin;
            if fil.rep_factor <= 0 {
                return Err(ConfigError::RepFactor(fil.rep_factor));
            }
            if fil.deal_min_duration < MIN_DEAL_DURATION {
                return Err(ConfigError::DealDuration(fil.deal_min_duration));
            }
            if fil.renew.enabled && fil.renew.threshold <= 0 {
                return Err(ConfigError::RenewThreshold(fil.renew.threshold));
            }
            if fil.addr.is_empty() {
                return Err(ConfigError::WalletAddress);
            }
        }
        // Renewals re-pin data from the hot layer.
        if self.is_renewable() && !self.hot.enabled {
            return Err(ConfigError::RenewWithoutHot);
        }
        Ok(())
    }
}
