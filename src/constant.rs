/// Minimum frame size on the wire; payloads below this are zero-padded,
/// payloads at or above it grow the frame to fit.
pub const BASELINE: usize = 1024;

/// Ceiling on a statement's buffered row cache under multi-row batching.
pub const RESULT_CACHE_CEILING: usize = 10 * BASELINE;

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Close = 0,
    ExecAsync = 1,
    ExecSync = 2,
    Final = 3,
    LastId = 4,
    OpenAsync = 5,
    OpenSync = 6,
    Ping = 7,
    PrepareBindAsync = 8,
    PrepareBindSync = 9,
    Rebind = 10,
    Role = 11,
    Step = 12,
    TransOpen = 13,
    TransClose = 14,
    MsgSetDat = 15,
}

impl Opcode {
    pub fn from_u32(value: u32) -> Option<Self> {
        Some(match value {
            0 => Self::Close,
            1 => Self::ExecAsync,
            2 => Self::ExecSync,
            3 => Self::Final,
            4 => Self::LastId,
            5 => Self::OpenAsync,
            6 => Self::OpenSync,
            7 => Self::Ping,
            8 => Self::PrepareBindAsync,
            9 => Self::PrepareBindSync,
            10 => Self::Rebind,
            11 => Self::Role,
            12 => Self::Step,
            13 => Self::TransOpen,
            14 => Self::TransClose,
            15 => Self::MsgSetDat,
            _ => return None,
        })
    }

    /// Whether the dispatch loop must write a reply frame for this opcode.
    pub fn is_sync(self) -> bool {
        matches!(
            self,
            Self::ExecSync
                | Self::LastId
                | Self::OpenSync
                | Self::Ping
                | Self::PrepareBindSync
                | Self::Step
        )
    }
}

bitflags::bitflags! {
    /// Flags carried on EXEC/PREPARE-BIND requests.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ExecFlags: u32 {
        /// Translate a constraint violation into a status code instead of a fatal error.
        const ACCEPT_CONSTRAINT = 0x01;
        /// Batch multiple STEP replies into the statement's result cache.
        const MULTI_ROW = 0x02;
    }
}

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionKind {
    Deferred = 0,
    Immediate = 1,
    Exclusive = 2,
    Commit = 3,
    Rollback = 4,
}

impl TransactionKind {
    pub fn from_u32(value: u32) -> Option<Self> {
        Some(match value {
            0 => Self::Deferred,
            1 => Self::Immediate,
            2 => Self::Exclusive,
            3 => Self::Commit,
            4 => Self::Rollback,
            _ => return None,
        })
    }

    pub fn is_open_kind(self) -> bool {
        matches!(self, Self::Deferred | Self::Immediate | Self::Exclusive)
    }

    pub fn is_close_kind(self) -> bool {
        matches!(self, Self::Commit | Self::Rollback)
    }

    pub fn sql(self) -> &'static str {
        match self {
            Self::Deferred => "BEGIN DEFERRED TRANSACTION",
            Self::Immediate => "BEGIN IMMEDIATE TRANSACTION",
            Self::Exclusive => "BEGIN EXCLUSIVE TRANSACTION",
            Self::Commit => "COMMIT TRANSACTION",
            Self::Rollback => "ROLLBACK TRANSACTION",
        }
    }
}

/// A STEP reply's per-row completion code.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepCode {
    Ok = 0,
    Constraint = 1,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_round_trips_through_u32() {
        for raw in 0..16u32 {
            let op = Opcode::from_u32(raw).expect("opcode in range");
            assert_eq!(op as u32, raw);
        }
        assert!(Opcode::from_u32(16).is_none());
    }

    #[test]
    fn sync_opcodes_match_dispatch_table() {
        assert!(Opcode::OpenSync.is_sync());
        assert!(Opcode::Step.is_sync());
        assert!(!Opcode::Close.is_sync());
        assert!(!Opcode::Rebind.is_sync());
    }

    #[test]
    fn transaction_kind_bounds() {
        assert!(TransactionKind::Deferred.is_open_kind());
        assert!(!TransactionKind::Commit.is_open_kind());
        assert!(TransactionKind::Rollback.is_close_kind());
        assert!(!TransactionKind::Exclusive.is_close_kind());
    }
}
