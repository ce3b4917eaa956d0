//! Identifiers for schedulables.

use std::cmp::Ordering;
use std::convert::TryFrom;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize, Serializer};

/// A stable identifier for a schedulable.
///
/// Ids are dense small integers handed out in creation order by the runtime
/// driving the exploration. The id doubles as the index of the schedulable's
/// entry in every decision point, so the scheduler relies on that density.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub struct ThreadId {
    opaque_id: u32,
}

impl Serialize for ThreadId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("t{}", self.opaque_id))
    }
}

impl Display for ThreadId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "t{}", self.opaque_id)
    }
}

#[derive(Debug)]
pub struct ThreadIdFromStrError {
    msg: String,
}

impl Display for ThreadIdFromStrError {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        f.write_str(&self.msg)
    }
}

impl TryFrom<String> for ThreadId {
    type Error = ThreadIdFromStrError;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        match s.strip_prefix('t') {
            Some(num) => match num.parse::<u32>() {
                Ok(tid) => Ok(ThreadId { opaque_id: tid }),
                Err(_) => Err(ThreadIdFromStrError {
                    msg: format!("Can't parse {} as a number", &s),
                }),
            },
            None => Err(ThreadIdFromStrError {
                msg: format!("`{}` should begin with `t`", &s),
            }),
        }
    }
}

/// Construct a ThreadId from its position in the schedulable list.
pub fn construct_thread_id(numeric_id: u32) -> ThreadId {
    ThreadId {
        opaque_id: numeric_id,
    }
}

impl From<ThreadId> for u32 {
    fn from(tid: ThreadId) -> Self {
        tid.opaque_id
    }
}

impl From<ThreadId> for usize {
    fn from(tid: ThreadId) -> Self {
        tid.opaque_id as usize
    }
}

impl ThreadId {
    pub(crate) fn to_number(self) -> u32 {
        self.opaque_id
    }

    /// The position `offset` places after this thread, wrapping at `len`.
    /// Used by the round-robin scans, which start at the thread that just ran.
    pub(crate) fn rotate(self, offset: usize, len: usize) -> usize {
        (self.opaque_id as usize + offset) % len
    }
}

/// Returns the id of the first schedulable, which is the one that runs first.
pub fn main_thread_id() -> ThreadId {
    ThreadId { opaque_id: 0 }
}

impl PartialOrd for ThreadId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// Needed in order to use thread ids as sorted keys (missing-id lists, BTreeMaps in tests)
impl Ord for ThreadId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.opaque_id.cmp(&other.opaque_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thread_id_serializes_as_string() {
        let t = construct_thread_id(7);
        let s = serde_json::to_string(&t).unwrap();
        assert_eq!(s, "\"t7\"");
        let back: ThreadId = serde_json::from_str(&s).unwrap();
        assert_eq!(back, t);
    }

    #[test]
    fn thread_id_rejects_bad_strings() {
        assert!(serde_json::from_str::<ThreadId>("\"x1\"").is_err());
        assert!(serde_json::from_str::<ThreadId>("\"tq\"").is_err());
    }

    #[test]
    fn rotate_wraps() {
        let t = construct_thread_id(2);
        assert_eq!(t.rotate(0, 3), 2);
        assert_eq!(t.rotate(1, 3), 0);
        assert_eq!(t.rotate(2, 3), 1);
    }
}
