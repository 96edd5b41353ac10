use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ReferralInfo {
    pub referral_code: String,
    pub referral_link: String,
    pub referral_count: i64,
    pub referred_users: Vec<String>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct NewReferral {
    pub new_user_id: String,
    pub referral_code: String,
}
