pub mod booking;
pub mod dispatch;
pub mod driver;
pub mod event;
pub mod payment;
pub mod vehicle;
