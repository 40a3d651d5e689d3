pub mod address;
pub mod phone;

pub use address::{AddressOutcome, AddressParser};
pub use phone::{PhoneMatcher, PhoneOutcome};
