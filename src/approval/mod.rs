pub mod proposal;
pub mod queue;

pub use proposal::{Decision, Proposal, ProposalKind};
pub use queue::{DecideTarget, ProposalConfirmer, ProposalQueue};
