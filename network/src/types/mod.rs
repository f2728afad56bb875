pub use self::contact::{Candidate, CandidateSet, Contact};
pub use self::id::{ID_BITS, ID_LEN, KadId};

mod contact;
mod id;
