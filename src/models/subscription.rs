use serde::{Deserialize, Serialize};

/// Plan limits as stored by the billing side. Read-only to this service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub name: String,

    pub search_limit: u32,

    pub result_limit: u32,

    pub monitoring_limit: u32,

    pub scheduled_search_limit: u32,

    pub price: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub plan: Plan,

    pub status: String,
}

impl Subscription {
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.status == "active" || self.status == "trialing"
    }
}

/// Access class controlling quota ceilings and visible result count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Anonymous,
    Basic,
    Premium,
    Admin,
}

impl Tier {
    /// Maps an active subscription to the paid tier it grants. Signed-in
    /// users without an active subscription fall back to basic.
    #[must_use]
    pub fn from_subscription(subscription: Option<&Subscription>) -> Self {
        match subscription {
            Some(s) if s.is_active() && s.plan.name.eq_ignore_ascii_case("premium") => {
                Self::Premium
            }
            Some(_) | None => Self::Basic,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Anonymous => "anonymous",
            Self::Basic => "basic",
            Self::Premium => "premium",
            Self::Admin => "admin",
        }
    }
}
