use serde::{Deserialize, Serialize};

/// Member cost share. Leaf entity owned by a plan or a plan service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostShare {
    pub deductible: i64,
    #[serde(rename = "_org")]
    pub org: String,
    pub copay: i64,
    #[serde(rename = "objectId")]
    pub object_id: String,
    #[serde(rename = "objectType")]
    pub object_type: String,
}

/// Covered service. Leaf entity owned by a linked plan service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    #[serde(rename = "_org")]
    pub org: String,
    #[serde(rename = "objectId")]
    pub object_id: String,
    #[serde(rename = "objectType")]
    pub object_type: String,
    pub name: String,
}

/// Plan service composing exactly one service and one cost share.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedPlanService {
    #[serde(rename = "linkedService")]
    pub linked_service: Service,
    #[serde(rename = "planserviceCostShares")]
    pub planservice_cost_shares: CostShare,
    #[serde(rename = "_org")]
    pub org: String,
    #[serde(rename = "objectId")]
    pub object_id: String,
    #[serde(rename = "objectType")]
    pub object_type: String,
}

/// Root aggregate: the unit of storage and of the weak validator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    #[serde(rename = "planCostShares")]
    pub plan_cost_shares: CostShare,
    #[serde(rename = "linkedPlanServices")]
    pub linked_plan_services: Vec<LinkedPlanService>,
    #[serde(rename = "_org")]
    pub org: String,
    #[serde(rename = "objectId")]
    pub object_id: String,
    #[serde(rename = "objectType")]
    pub object_type: String,
    #[serde(rename = "planType")]
    pub plan_type: String,
    /// ISO `yyyy-mm-dd`, normalized at validation time.
    #[serde(rename = "creationDate")]
    pub creation_date: String,
}

/// The five indexed document kinds, linked through one polymorphic
/// parent-child join relation:
/// `plan -> {planCostShares, linkedPlanServices}` and
/// `linkedPlanServices -> {linkedService, planserviceCostShares}`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DocKind {
    Plan,
    PlanCostShares,
    LinkedPlanServices,
    LinkedService,
    PlanserviceCostShares,
}

impl DocKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocKind::Plan => "plan",
            DocKind::PlanCostShares => "planCostShares",
            DocKind::LinkedPlanServices => "linkedPlanServices",
            DocKind::LinkedService => "linkedService",
            DocKind::PlanserviceCostShares => "planserviceCostShares",
        }
    }

    /// Child kinds under the join relation, or empty for leaves.
    pub fn children(&self) -> &'static [DocKind] {
        match self {
            DocKind::Plan => &[DocKind::PlanCostShares, DocKind::LinkedPlanServices],
            DocKind::LinkedPlanServices => {
                &[DocKind::LinkedService, DocKind::PlanserviceCostShares]
            }
            _ => &[],
        }
    }
}

impl std::fmt::Display for DocKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DocKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "plan" => Ok(DocKind::Plan),
            "planCostShares" => Ok(DocKind::PlanCostShares),
            "linkedPlanServices" => Ok(DocKind::LinkedPlanServices),
            "linkedService" => Ok(DocKind::LinkedService),
            "planserviceCostShares" => Ok(DocKind::PlanserviceCostShares),
            other => Err(format!("unknown document kind `{other}`")),
        }
    }
}
