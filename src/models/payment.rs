use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentKind {
    Full,
    DownPayment,
    FinalPayment,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Settled,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub booking_id: Uuid,
    pub kind: PaymentKind,
    pub status: PaymentStatus,
    pub recorded_at: DateTime<Utc>,
}

impl Payment {
    pub fn is_settled(&self) -> bool {
        self.status == PaymentStatus::Settled
    }

    pub fn covers_down_payment(&self) -> bool {
        self.is_settled()
    }

    pub fn is_settled_full(&self) -> bool {
        self.is_settled() && self.kind == PaymentKind::Full
    }

    pub fn is_settled_final(&self) -> bool {
        self.is_settled() && self.kind == PaymentKind::FinalPayment
    }
}
