use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CustomerId(pub Uuid);

impl CustomerId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

/// Coarse customer tier driving discount and escalation conditions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Segment {
    New,
    Regular,
    Loyal,
    Vip,
}

impl Segment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Regular => "regular",
            Self::Loyal => "loyal",
            Self::Vip => "vip",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "new" => Some(Self::New),
            "regular" => Some(Self::Regular),
            "loyal" => Some(Self::Loyal),
            "vip" => Some(Self::Vip),
            _ => None,
        }
    }
}

const VIP_ORDER_COUNT: u32 = 10;
const VIP_LIFETIME_SPEND_CENTS: i64 = 100_000;
const LOYAL_ORDER_COUNT: u32 = 5;

/// One durable customer identity. Unique by `external_id` when present,
/// otherwise by normalized email or normalized phone.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub id: CustomerId,
    pub external_id: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub name: Option<String>,
    pub order_count: u32,
    pub lifetime_spend_cents: i64,
    pub last_order_at: Option<DateTime<Utc>>,
    pub segment: Segment,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Customer {
    pub fn new_unmatched(
        external_id: Option<String>,
        email: Option<String>,
        phone: Option<String>,
        name: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: CustomerId::generate(),
            external_id,
            email,
            phone,
            name,
            order_count: 0,
            lifetime_spend_cents: 0,
            last_order_at: None,
            segment: Segment::New,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn derived_segment(&self) -> Segment {
        derive_segment(self.order_count, self.lifetime_spend_cents)
    }

    /// Recompute the segment tag after an aggregate change.
    pub fn refresh_segment(&mut self) {
        self.segment = self.derived_segment();
    }

    pub fn profile_summary(&self) -> String {
        format!(
            "{} | segment: {} | orders: {} | lifetime spend: ${}.{:02}",
            self.name.as_deref().unwrap_or("unknown customer"),
            self.segment.as_str(),
            self.order_count,
            self.lifetime_spend_cents / 100,
            (self.lifetime_spend_cents % 100).unsigned_abs(),
        )
    }
}

pub fn derive_segment(order_count: u32, lifetime_spend_cents: i64) -> Segment {
    if order_count >= VIP_ORDER_COUNT || lifetime_spend_cents >= VIP_LIFETIME_SPEND_CENTS {
        Segment::Vip
    } else if order_count >= LOYAL_ORDER_COUNT {
        Segment::Loyal
    } else if order_count >= 1 {
        Segment::Regular
    } else {
        Segment::New
    }
}

#[cfg(test)]
mod tests {
    use super::{derive_segment, Customer, Segment};

    #[test]
    fn segment_thresholds() {
        assert_eq!(derive_segment(0, 0), Segment::New);
        assert_eq!(derive_segment(1, 500), Segment::Regular);
        assert_eq!(derive_segment(5, 500), Segment::Loyal);
        assert_eq!(derive_segment(10, 500), Segment::Vip);
        assert_eq!(derive_segment(2, 100_000), Segment::Vip);
    }

    #[test]
    fn new_unmatched_customer_starts_in_new_segment() {
        let customer = Customer::new_unmatched(None, Some("a@b.com".into()), None, None);
        assert_eq!(customer.segment, Segment::New);
        assert_eq!(customer.order_count, 0);
        assert!(customer.last_order_at.is_none());
    }

    #[test]
    fn segment_round_trips_through_str() {
        for segment in [Segment::New, Segment::Regular, Segment::Loyal, Segment::Vip] {
            assert_eq!(Segment::parse(segment.as_str()), Some(segment));
        }
        assert_eq!(Segment::parse("platinum"), None);
    }
}
