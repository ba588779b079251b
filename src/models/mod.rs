pub mod application;
pub mod cart;
pub mod club;
pub mod event;
pub mod invite;
pub mod membership;
pub mod settings;
pub mod ticket;
