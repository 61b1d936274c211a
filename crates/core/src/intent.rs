use serde::{Deserialize, Serialize};

/// Closed set of communicative purposes a message can be classified into.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Greeting,
    ProductInquiry,
    PriceRequest,
    PurchaseIntent,
    SupportRequest,
    Complaint,
    Goodbye,
    Other,
}

impl Intent {
    pub const ALL: [Intent; 8] = [
        Intent::Greeting,
        Intent::ProductInquiry,
        Intent::PriceRequest,
        Intent::PurchaseIntent,
        Intent::SupportRequest,
        Intent::Complaint,
        Intent::Goodbye,
        Intent::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Greeting => "greeting",
            Self::ProductInquiry => "product_inquiry",
            Self::PriceRequest => "price_request",
            Self::PurchaseIntent => "purchase_intent",
            Self::SupportRequest => "support_request",
            Self::Complaint => "complaint",
            Self::Goodbye => "goodbye",
            Self::Other => "other",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|intent| intent.as_str() == raw)
    }

    /// Total coercion: anything outside the closed set becomes `Other`.
    pub fn from_label(raw: &str) -> Self {
        Self::parse(raw.trim().to_ascii_lowercase().as_str()).unwrap_or(Self::Other)
    }
}
