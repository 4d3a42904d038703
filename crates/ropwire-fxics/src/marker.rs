//! Markers and meta-properties.
//!
//! Markers are 32-bit values shaped like property tags of type
//! Integer32 but carry no value. They delimit objects in a stream.
//! Meta-properties look like ordinary properties and carry stream
//! metadata such as ICS state.

use ropwire_core::PropertyTag;
use serde::Serialize;

macro_rules! markers {
    ($($(#[$doc:meta])* $name:ident = $value:literal,)*) => {
        /// Stream delimiters
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
        #[repr(u32)]
        pub enum Marker {
            $($(#[$doc])* $name = $value,)*
        }

        impl Marker {
            /// Match a raw stream value against the marker table
            #[must_use]
            pub fn from_u32(value: u32) -> Option<Self> {
                match value {
                    $($value => Some(Self::$name),)*
                    _ => None,
                }
            }

            /// Name as written in protocol documents
            #[must_use]
            pub fn name(self) -> &'static str {
                match self {
                    $(Self::$name => stringify!($name),)*
                }
            }
        }
    };
}

markers! {
    /// Start of a top-level folder
    StartTopFld = 0x4009_0003,
    /// Start of a subfolder
    StartSubFld = 0x400A_0003,
    /// End of a folder
    EndFolder = 0x400B_0003,
    /// Start of a normal message
    StartMessage = 0x400C_0003,
    /// End of a message
    EndMessage = 0x400D_0003,
    /// Start of an associated message
    StartFaiMsg = 0x4010_0003,
    /// Start of an embedded message
    StartEmbed = 0x4001_0003,
    /// End of an embedded message
    EndEmbed = 0x4002_0003,
    /// Start of a recipient
    StartRecip = 0x4003_0003,
    /// End of a recipient
    EndToRecip = 0x4004_0003,
    /// Start of an attachment
    NewAttach = 0x4000_0003,
    /// End of an attachment
    EndAttach = 0x400E_0003,
    /// ICS change header
    IncrSyncChg = 0x4012_0003,
    /// ICS partial change header
    IncrSyncChgPartial = 0x407D_0003,
    /// ICS deletions
    IncrSyncDel = 0x4013_0003,
    /// End of an ICS stream
    IncrSyncEnd = 0x1414_0003,
    /// ICS message body follows the change header
    IncrSyncMessage = 0x4015_0003,
    /// ICS read-state changes
    IncrSyncRead = 0x402F_0003,
    /// Start of ICS state
    IncrSyncStateBegin = 0x403A_0003,
    /// End of ICS state
    IncrSyncStateEnd = 0x403B_0003,
    /// Error info block
    FxErrorInfo = 0x4018_0003,
}

impl Marker {
    /// Raw value
    #[must_use]
    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

/// Meta-property tags
pub mod meta {
    use super::PropertyTag;

    /// Property to delete on the destination before copying
    pub const FX_DEL_PROP: PropertyTag = PropertyTag(0x4016_0003);
    /// Warning code for an object that could not be copied
    pub const EC_WARNING: PropertyTag = PropertyTag(0x400F_0003);
    /// Folder was created by the copy
    pub const NEW_FX_FOLDER: PropertyTag = PropertyTag(0x4011_0102);
    /// Object ids the client already has; typed Integer32 but carries a binary
    pub const IDSET_GIVEN: PropertyTag = PropertyTag(0x4017_0003);
    /// Change numbers the client has seen
    pub const CNSET_SEEN: PropertyTag = PropertyTag(0x6796_0102);
    /// Change numbers of associated messages the client has seen
    pub const CNSET_SEEN_FAI: PropertyTag = PropertyTag(0x67DA_0102);
    /// Read-state change numbers the client has seen
    pub const CNSET_READ: PropertyTag = PropertyTag(0x67D2_0102);
    /// Ids deleted since the last sync
    pub const IDSET_DELETED: PropertyTag = PropertyTag(0x67E5_0102);
    /// Ids that left the sync scope
    pub const IDSET_NO_LONGER_IN_SCOPE: PropertyTag = PropertyTag(0x4021_0102);
    /// Ids that expired
    pub const IDSET_EXPIRED: PropertyTag = PropertyTag(0x6793_0102);
    /// Ids marked read
    pub const IDSET_READ: PropertyTag = PropertyTag(0x402D_0102);
    /// Ids marked unread
    pub const IDSET_UNREAD: PropertyTag = PropertyTag(0x402E_0102);

    /// Meta-properties whose value is a `u32`-length binary regardless of
    /// the declared type
    #[must_use]
    pub fn forces_binary(tag: PropertyTag) -> bool {
        tag == IDSET_GIVEN
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_lookup() {
        assert_eq!(Marker::from_u32(0x4009_0003), Some(Marker::StartTopFld));
        assert_eq!(Marker::from_u32(0x1414_0003), Some(Marker::IncrSyncEnd));
        assert_eq!(Marker::from_u32(0x0037_001F), None);
        assert_eq!(Marker::EndMessage.name(), "EndMessage");
        assert_eq!(Marker::IncrSyncChg.as_u32(), 0x4012_0003);
    }

    #[test]
    fn test_meta_forces_binary() {
        assert!(meta::forces_binary(meta::IDSET_GIVEN));
        assert!(!meta::forces_binary(meta::CNSET_SEEN));
    }
}
