pub mod applications;
pub mod approval;
pub mod checkout;
pub mod holds;
pub mod inventory;
pub mod invites;
pub mod notify;
pub mod perms;
pub mod scheduler;
pub mod tickets;
