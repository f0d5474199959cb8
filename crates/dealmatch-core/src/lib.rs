//! Core domain read models and the persisted match record for DealMatch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const CRATE_NAME: &str = "dealmatch-core";

/// Direction of a client mandate: buy-side (`compra`) or sell-side (`venta`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MandateType {
    Compra,
    Venta,
}

impl MandateType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Compra => "compra",
            Self::Venta => "venta",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "compra" => Some(Self::Compra),
            "venta" => Some(Self::Venta),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeographicScope {
    Local,
    Regional,
    Nacional,
    Internacional,
}

impl GeographicScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Regional => "regional",
            Self::Nacional => "nacional",
            Self::Internacional => "internacional",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "local" => Some(Self::Local),
            "regional" => Some(Self::Regional),
            "nacional" => Some(Self::Nacional),
            "internacional" => Some(Self::Internacional),
            _ => None,
        }
    }
}

/// CRM lifecycle state of a company record. Only `activa` companies are
/// eligible for matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompanyStatus {
    Activa,
    Inactiva,
    Archivada,
}

impl CompanyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Activa => "activa",
            Self::Inactiva => "inactiva",
            Self::Archivada => "archivada",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "activa" => Some(Self::Activa),
            "inactiva" => Some(Self::Inactiva),
            "archivada" => Some(Self::Archivada),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MandateStatus {
    Active,
    Paused,
    Closed,
}

impl MandateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Closed => "closed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(Self::Active),
            "paused" => Some(Self::Paused),
            "closed" => Some(Self::Closed),
            _ => None,
        }
    }
}

/// Workflow state of a match row. The engine only ever writes `new`;
/// advancing a match belongs to the downstream deal workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    New,
    InReview,
    Contacted,
    Discarded,
}

impl MatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::InReview => "in_review",
            Self::Contacted => "contacted",
            Self::Discarded => "discarded",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "new" => Some(Self::New),
            "in_review" => Some(Self::InReview),
            "contacted" => Some(Self::Contacted),
            "discarded" => Some(Self::Discarded),
            _ => None,
        }
    }
}

/// Company read model. Owned by the CRM; read-only to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Company {
    pub id: Uuid,
    pub name: String,
    pub industry: String,
    pub country: Option<String>,
    pub region: Option<String>,
    pub geographic_scope: GeographicScope,
    pub annual_revenue: f64,
    pub seller_ready: bool,
    pub buyer_active: bool,
    pub engagement_score: i32,
    pub status: CompanyStatus,
}

impl Company {
    pub fn is_active(&self) -> bool {
        self.status == CompanyStatus::Activa
    }
}

/// Mandate read model. Owned by the CRM; read-only to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mandate {
    pub id: Uuid,
    pub name: String,
    pub mandate_type: MandateType,
    pub target_sectors: Vec<String>,
    pub target_locations: Vec<String>,
    /// Lower revenue bound. Defaults to 0 when the mandate does not set one.
    pub min_revenue: f64,
    /// Upper revenue bound; `None` means unbounded.
    pub max_revenue: Option<f64>,
    pub status: MandateStatus,
}

impl Mandate {
    pub fn is_active(&self) -> bool {
        self.status == MandateStatus::Active
    }

    pub fn revenue_in_range(&self, annual_revenue: f64) -> bool {
        if annual_revenue < self.min_revenue {
            return false;
        }
        match self.max_revenue {
            Some(max) => annual_revenue <= max,
            None => true,
        }
    }
}

/// Outcome of one scoring category: full credit, partial credit, or a miss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryOutcome {
    pub matched: bool,
    pub partial: bool,
    pub points: i32,
}

impl CategoryOutcome {
    pub fn full(points: i32) -> Self {
        Self {
            matched: true,
            partial: false,
            points,
        }
    }

    pub fn partial(points: i32) -> Self {
        Self {
            matched: false,
            partial: true,
            points,
        }
    }

    pub fn miss() -> Self {
        Self {
            matched: false,
            partial: false,
            points: 0,
        }
    }
}

/// Structured snapshot of the five category outcomes behind a match score.
/// Persisted verbatim alongside the score so a reviewer can see why a pair
/// matched without recomputing it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchDetails {
    pub industry: CategoryOutcome,
    pub geography: CategoryOutcome,
    pub revenue: CategoryOutcome,
    pub readiness: CategoryOutcome,
    pub engagement: CategoryOutcome,
    pub calculated_at: DateTime<Utc>,
}

impl MatchDetails {
    pub fn total(&self) -> i32 {
        self.industry.points
            + self.geography.points
            + self.revenue.points
            + self.readiness.points
            + self.engagement.points
    }
}

/// Persisted scored association between one company and one mandate.
/// Unique on (company_id, mandate_id); the store enforces the constraint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    pub id: Uuid,
    pub company_id: Uuid,
    pub mandate_id: Uuid,
    pub match_score: i32,
    pub match_details: MatchDetails,
    pub status: MatchStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
