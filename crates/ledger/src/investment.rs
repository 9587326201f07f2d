use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use fundhub_core::{AccountId, Entity, InvestmentId, Money, ProjectId, TransactionId};

/// Join record between an investor account, a project and the journaled
/// INVESTMENT transaction that moved the money. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Investment {
    pub id: InvestmentId,
    pub project_id: ProjectId,
    pub investor_account_id: AccountId,
    pub transaction_id: TransactionId,
    pub amount: Money,
    pub created_at: DateTime<Utc>,
}

impl Entity for Investment {
    type Id = InvestmentId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}
