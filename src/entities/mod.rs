//! Entity module - Contains all SeaORM entity definitions for the database.
//! These entities represent the database tables and their relationships.
//! Each entity has a Model struct for data and an Entity struct for operations.

pub mod booking;
pub mod booking_review;
pub mod mentor_profile;
pub mod payment_transaction;
pub mod scheduled_job;
pub mod wallet;
pub mod wallet_entry;

// Re-export specific types to avoid conflicts
pub use booking::{
    BookingStatus, Column as BookingColumn, Entity as Booking, Funding, Model as BookingModel,
};
pub use booking_review::{Entity as BookingReview, Model as BookingReviewModel};
pub use mentor_profile::{Entity as MentorProfile, Model as MentorProfileModel};
pub use payment_transaction::{
    Entity as PaymentTransaction, Model as PaymentTransactionModel, PaymentKind, PaymentMethod,
    PaymentStatus,
};
pub use scheduled_job::{Entity as ScheduledJob, JobKind, JobStatus, Model as ScheduledJobModel};
pub use wallet::{Entity as Wallet, Model as WalletModel};
pub use wallet_entry::{Entity as WalletEntry, EntryKind, Model as WalletEntryModel};
