//! Server configuration

use ropwire_core::{DEFAULT_MAX_BUFFER_SIZE, MAX_HANDLE_SLOTS, MAX_RESPONSE_BUFFER_SIZE};
use ropwire_fxics::DEFAULT_CHUNK_SIZE;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ServerError};

/// Reference server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Largest handle table a request may carry
    pub max_handle_slots: usize,

    /// Objects one session may hold open at once
    pub max_open_objects: usize,

    /// Response buffer budget; a request may lower it but never raise it
    pub max_response_size: usize,

    /// Chunk size used when GetBuffer lets the server choose
    pub fast_transfer_chunk: usize,

    /// Objects removed per Progress step of an asynchronous EmptyFolder
    pub empty_folder_batch: usize,

    /// Seed for replica and mailbox GUIDs; random when unset
    pub replica_seed: Option<u64>,

    /// Number of exchanges per session answered with RopBackoff
    pub busy_exchanges: u32,

    /// Duration advertised in simulated RopBackoff responses
    pub backoff_ms: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_handle_slots: MAX_HANDLE_SLOTS,
            max_open_objects: 1024,
            max_response_size: DEFAULT_MAX_BUFFER_SIZE,
            fast_transfer_chunk: DEFAULT_CHUNK_SIZE,
            empty_folder_batch: 2,
            replica_seed: None,
            busy_exchanges: 0,
            backoff_ms: 50,
        }
    }
}

impl ServerConfig {
    /// Check limits against protocol bounds
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::InvalidConfig`] naming the first bad field.
    pub fn validate(&self) -> Result<()> {
        if self.max_handle_slots == 0 || self.max_handle_slots > MAX_HANDLE_SLOTS {
            return Err(ServerError::InvalidConfig(format!(
                "max_handle_slots must be 1..={MAX_HANDLE_SLOTS}"
            )));
        }
        if self.max_open_objects == 0 {
            return Err(ServerError::InvalidConfig("max_open_objects must be positive".into()));
        }
        if self.max_response_size < 64 || self.max_response_size > MAX_RESPONSE_BUFFER_SIZE {
            return Err(ServerError::InvalidConfig(format!(
                "max_response_size must be 64..={MAX_RESPONSE_BUFFER_SIZE:#X}"
            )));
        }
        if self.fast_transfer_chunk == 0 || self.fast_transfer_chunk > usize::from(u16::MAX) {
            return Err(ServerError::InvalidConfig(
                "fast_transfer_chunk must fit a 16-bit buffer size".into(),
            ));
        }
        if self.empty_folder_batch == 0 {
            return Err(ServerError::InvalidConfig("empty_folder_batch must be positive".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(ServerConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rejects_oversized_response() {
        let config = ServerConfig {
            max_response_size: MAX_RESPONSE_BUFFER_SIZE + 1,
            ..ServerConfig::default()
        };
        assert!(matches!(config.validate(), Err(ServerError::InvalidConfig(_))));
    }

    #[test]
    fn test_zero_batch_rejected() {
        let config = ServerConfig {
            empty_folder_batch: 0,
            ..ServerConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
