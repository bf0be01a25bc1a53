//! Built-in message kinds.

use super::wire_format::{DECREMENT_TYPE_CODE, WORK_TYPE_CODE};

/// Message kinds every worker understands.
///
/// These occupy the low type codes; codes from
/// [`FIRST_USER_TYPE_CODE`](super::FIRST_USER_TYPE_CODE) upward belong to
/// handlers registered on the worker builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MessageKind {
    /// One remote work item to append to the pending-work queue.
    Work = WORK_TYPE_CODE,
    /// Closing report of one distributed-reference instance.
    Decrement = DECREMENT_TYPE_CODE,
}

impl MessageKind {
    /// All built-in kinds, in type-code order.
    pub const ALL: [MessageKind; 2] = [MessageKind::Work, MessageKind::Decrement];

    /// Wire type code of this kind.
    #[inline]
    pub fn type_code(self) -> u16 {
        self as u16
    }

    /// Registry name of this kind.
    pub fn name(self) -> &'static str {
        match self {
            MessageKind::Work => "work",
            MessageKind::Decrement => "decrement",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_work_is_type_code_zero() {
        assert_eq!(MessageKind::Work.type_code(), 0);
    }

    #[test]
    fn test_all_in_code_order() {
        for (code, kind) in MessageKind::ALL.iter().enumerate() {
            assert_eq!(kind.type_code() as usize, code);
        }
        assert_eq!(MessageKind::ALL.len() as u16, super::super::FIRST_USER_TYPE_CODE);
    }
}
