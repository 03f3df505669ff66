/// Booking state machine and its escrow effects
pub mod booking;
/// Shared database and collaborator handles
pub mod context;
/// Mentor skill points, levels and badges
pub mod gamification;
/// Amount validation and payout arithmetic
pub mod money;
/// Payment transaction ledger and gateway callbacks
pub mod payment;
/// Auto-cancel and reminder jobs
pub mod scheduler;
/// Wallet escrow ledger
pub mod wallet;
