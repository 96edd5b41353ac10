pub mod referrals;
pub mod usage;
