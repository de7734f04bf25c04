//! Tuning parameters for the piece bookkeeping core.
//!
//! Defaults follow the behavior of mature downloaders; each one can be
//! overridden through [`crate::PieceStorage`] setters or
//! [`crate::StorageOptions`].

use std::time::Duration;

/// Number of missing pieces at or below which end-game mode begins.
///
/// In end-game the in-use exclusion is dropped so the last pieces can be
/// requested from several peers at once.
pub const DEFAULT_END_GAME_PIECE_NUM: u32 = 100;

/// Default cap on simultaneously open descriptors in multi-file mode.
pub const DEFAULT_MAX_OPEN_FILES: usize = 100;

/// Typical age past which advertised HAVE entries are trimmed.
pub const DEFAULT_HAVE_ENTRY_EXPIRY: Duration = Duration::from_secs(30);
