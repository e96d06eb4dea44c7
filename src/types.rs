//! Typed identifiers shared by the store and the jobs.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::BatchError;

/// Platform user id. Always positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(i64);

impl UserId {
    /// Returns `None` for ids that cannot belong to a real user.
    pub fn new(raw: i64) -> Option<Self> {
        (raw > 0).then_some(Self(raw))
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Guild id. Always positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GuildId(i64);

impl GuildId {
    pub fn new(raw: i64) -> Option<Self> {
        (raw > 0).then_some(Self(raw))
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for GuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Owner of a statistics counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subject {
    User(UserId),
    Guild(GuildId),
    Global,
}

impl Subject {
    /// Value of the `subject_kind` column.
    pub fn kind(&self) -> &'static str {
        match self {
            Subject::User(_) => "user",
            Subject::Guild(_) => "guild",
            Subject::Global => "global",
        }
    }

    /// Value of the `subject_id` column; global counters use 0.
    pub fn id(&self) -> i64 {
        match self {
            Subject::User(id) => id.get(),
            Subject::Guild(id) => id.get(),
            Subject::Global => 0,
        }
    }
}

impl From<UserId> for Subject {
    fn from(id: UserId) -> Self {
        Subject::User(id)
    }
}

impl From<GuildId> for Subject {
    fn from(id: GuildId) -> Self {
        Subject::Guild(id)
    }
}

/// Coins mined through the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Coin {
    Xmr,
    Etc,
    Rvn,
}

impl Coin {
    pub const ALL: [Coin; 3] = [Coin::Etc, Coin::Rvn, Coin::Xmr];

    pub fn as_str(&self) -> &'static str {
        match self {
            Coin::Xmr => "xmr",
            Coin::Etc => "etc",
            Coin::Rvn => "rvn",
        }
    }

    /// Ticker used by the wallet table.
    pub fn sign(&self) -> &'static str {
        match self {
            Coin::Xmr => "XMR",
            Coin::Etc => "ETC",
            Coin::Rvn => "RVN",
        }
    }

    /// Guild weekly task fed by this coin's mining statistics.
    pub fn guild_task_key(&self) -> &'static str {
        match self {
            Coin::Xmr => "cpucoins",
            Coin::Etc | Coin::Rvn => "gpucoins",
        }
    }
}

impl fmt::Display for Coin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Coin {
    type Err = BatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "xmr" => Ok(Coin::Xmr),
            "etc" => Ok(Coin::Etc),
            "rvn" => Ok(Coin::Rvn),
            other => Err(BatchError::InvalidInput(format!("coin not supported: {other}"))),
        }
    }
}
