//! Query and mutation surface for the custody panel.
//!
//! [`CustodyApi`] is the typed facade; [`CustodyApi::handle_json`] accepts a
//! tagged JSON request and always answers with `{"ok": ...}` or
//! `{"error": {"kind", "message", "retryable"}}`.

use crate::balance::MassBalanceReport;
use crate::error::{ErrorKind, LedgerError, Result};
use crate::ledger::Ledger;
use crate::types::{
    ChainId, ChainStatus, CreateChainInput, CustodyChain, CustodyEvent, Disposition,
    FacilityRef, MergeRequest, ProductType, RecordEventInput, SplitRequest, UserRef,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A chain with its references resolved for display.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainView {
    #[serde(flatten)]
    pub chain: CustodyChain,
    pub source_plot_name: Option<String>,
    pub source_facility_name: Option<String>,
    pub destination_facility_name: Option<String>,
}

/// Filter for chain listings. Empty fields match everything.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ChainQuery {
    pub status: Option<ChainStatus>,
    pub product_type: Option<ProductType>,
    /// Matches either end of the chain.
    pub facility: Option<FacilityRef>,
}

impl ChainQuery {
    fn matches(&self, chain: &CustodyChain) -> bool {
        self.status.map_or(true, |s| chain.status == s)
            && self.product_type.map_or(true, |p| chain.product_type == p)
            && self.facility.as_ref().map_or(true, |f| {
                chain.source_facility.as_ref() == Some(f)
                    || chain.destination_facility.as_ref() == Some(f)
            })
    }
}

/// Result of recording an event.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordEventResponse {
    pub event: CustodyEvent,
    pub chain: ChainView,
    pub outputs: Vec<ChainView>,
}

/// Requests understood by [`CustodyApi::handle_json`].
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum ApiRequest {
    GetCustodyChains {
        #[serde(default)]
        filter: ChainQuery,
    },
    #[serde(rename_all = "camelCase")]
    GetCustodyChain { chain_id: ChainId },
    #[serde(rename_all = "camelCase")]
    GetCustodyEvents { chain_id: ChainId },
    #[serde(rename_all = "camelCase")]
    ValidateMassBalance { chain_id: ChainId },
    CreateCustodyChain { input: CreateChainInput },
    RecordCustodyEvent { input: RecordEventInput },
    #[serde(rename_all = "camelCase")]
    SplitChain {
        chain_id: ChainId,
        request: SplitRequest,
    },
    MergeChains { request: MergeRequest },
    #[serde(rename_all = "camelCase")]
    CloseCustodyChain {
        chain_id: ChainId,
        disposition: Disposition,
        #[serde(default)]
        recorded_by: Option<UserRef>,
        #[serde(default)]
        notes: Option<String>,
    },
}

/// Error body returned to API clients.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiError {
    pub kind: ErrorKind,
    pub message: String,
    pub retryable: bool,
}

impl From<&LedgerError> for ApiError {
    fn from(e: &LedgerError) -> Self {
        Self {
            kind: e.kind(),
            message: e.to_string(),
            retryable: e.is_retryable(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
enum ApiResponse {
    Ok(serde_json::Value),
    Error(ApiError),
}

/// Typed facade over a shared [`Ledger`].
#[derive(Clone)]
pub struct CustodyApi {
    ledger: Arc<Ledger>,
}

impl CustodyApi {
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self { ledger }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Chains matching `query`, ordered by id.
    pub fn get_custody_chains(&self, query: &ChainQuery) -> Vec<ChainView> {
        self.ledger
            .list_chains()
            .iter()
            .filter(|c| query.matches(c))
            .map(|c| self.view(c))
            .collect()
    }

    pub fn get_custody_chain(&self, chain_id: ChainId) -> Result<ChainView> {
        let chain = self.ledger.get_chain(chain_id)?;
        Ok(self.view(&chain))
    }

    /// A chain's events ordered by `(event_time, id)`.
    pub fn get_custody_events(&self, chain_id: ChainId) -> Result<Vec<CustodyEvent>> {
        self.ledger
            .list_events(chain_id)?
            .map(|e| e.map(|e| (*e).clone()))
            .collect()
    }

    pub fn validate_mass_balance(&self, chain_id: ChainId) -> Result<MassBalanceReport> {
        self.ledger.validate_mass_balance(chain_id)
    }

    pub fn create_custody_chain(&self, input: CreateChainInput) -> Result<ChainView> {
        let chain = self.ledger.create_chain(input)?;
        Ok(self.view(&chain))
    }

    pub fn record_custody_event(&self, input: RecordEventInput) -> Result<RecordEventResponse> {
        let recorded = self.ledger.record_event(input)?;
        Ok(RecordEventResponse {
            event: (*recorded.event).clone(),
            chain: self.view(&recorded.chain),
            outputs: recorded.outputs.iter().map(|c| self.view(c)).collect(),
        })
    }

    pub fn split_chain(&self, chain_id: ChainId, request: SplitRequest) -> Result<Vec<ChainView>> {
        let children = self.ledger.split(chain_id, request)?;
        Ok(children.iter().map(|c| self.view(c)).collect())
    }

    pub fn merge_chains(&self, request: MergeRequest) -> Result<ChainView> {
        let chain = self.ledger.merge(request)?;
        Ok(self.view(&chain))
    }

    pub fn close_custody_chain(
        &self,
        chain_id: ChainId,
        disposition: Disposition,
        recorded_by: Option<UserRef>,
        notes: Option<String>,
    ) -> Result<ChainView> {
        let chain = self
            .ledger
            .close_chain(chain_id, disposition, recorded_by, notes)?;
        Ok(self.view(&chain))
    }

    /// Dispatch one JSON request. Never fails; errors are encoded in the
    /// response body.
    pub fn handle_json(&self, request: &str) -> String {
        let response = match self.dispatch(request) {
            Ok(value) => ApiResponse::Ok(value),
            Err(e) => {
                tracing::debug!(error = %e, "custody API request failed");
                ApiResponse::Error(ApiError::from(&e))
            }
        };
        serde_json::to_string(&response).unwrap_or_else(|e| {
            format!(
                r#"{{"error":{{"kind":"storage","message":"failed to encode response: {}","retryable":false}}}}"#,
                e.to_string().replace('"', "'")
            )
        })
    }

    fn dispatch(&self, request: &str) -> Result<serde_json::Value> {
        let request: ApiRequest = serde_json::from_str(request)
            .map_err(|e| LedgerError::Validation(format!("invalid request: {}", e)))?;

        let value = match request {
            ApiRequest::GetCustodyChains { filter } => {
                serde_json::to_value(self.get_custody_chains(&filter))?
            }
            ApiRequest::GetCustodyChain { chain_id } => {
                serde_json::to_value(self.get_custody_chain(chain_id)?)?
            }
            ApiRequest::GetCustodyEvents { chain_id } => {
                serde_json::to_value(self.get_custody_events(chain_id)?)?
            }
            ApiRequest::ValidateMassBalance { chain_id } => {
                serde_json::to_value(self.validate_mass_balance(chain_id)?)?
            }
            ApiRequest::CreateCustodyChain { input } => {
                serde_json::to_value(self.create_custody_chain(input)?)?
            }
            ApiRequest::RecordCustodyEvent { input } => {
                serde_json::to_value(self.record_custody_event(input)?)?
            }
            ApiRequest::SplitChain { chain_id, request } => {
                serde_json::to_value(self.split_chain(chain_id, request)?)?
            }
            ApiRequest::MergeChains { request } => {
                serde_json::to_value(self.merge_chains(request)?)?
            }
            ApiRequest::CloseCustodyChain {
                chain_id,
                disposition,
                recorded_by,
                notes,
            } => serde_json::to_value(self.close_custody_chain(chain_id, disposition, recorded_by, notes)?)?,
        };
        Ok(value)
    }

    /// Resolve references on demand; missing entries stay unnamed.
    fn view(&self, chain: &CustodyChain) -> ChainView {
        let directory = self.ledger.directory();
        let facility_name = |f: &Option<FacilityRef>| {
            f.as_ref()
                .and_then(|f| directory.facility(f))
                .map(|f| f.name)
        };
        ChainView {
            source_plot_name: chain
                .source_plot
                .as_ref()
                .and_then(|p| directory.plot(p))
                .map(|p| p.name),
            source_facility_name: facility_name(&chain.source_facility),
            destination_facility_name: facility_name(&chain.destination_facility),
            chain: chain.clone(),
        }
    }
}
