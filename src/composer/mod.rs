//! Route composer - multi-hop route discovery and normalization
//!
//! Routes come from the remote quote service (`FIND_ROUTES`) or, for plain
//! same-token bridging, straight from catalog data. Either way every route
//! handed out satisfies hop continuity: each step starts on the chain and
//! asset the previous step ended on.

use crate::catalog::{Amount, ChainId, ProviderId, RouteCatalog, TokenId};
use crate::channel::{self, MessageChannel, MessageType};
use crate::config::RoutingConfig;
use crate::error::{TransferError, TransferResult};
use crate::selector::SelectionField;
use crate::transfer::BridgeTransferRequest;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// What a single hop does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepType {
    Bridge,
    Swap,
    #[serde(alias = "icp")]
    Transfer,
}

/// One hop of a route
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteStep {
    #[serde(rename = "type")]
    pub step_type: StepType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderId>,
    pub from_chain: ChainId,
    pub to_chain: ChainId,
    pub from_asset: TokenId,
    pub to_asset: TokenId,
    pub from_amount: Amount,
    pub to_amount: Amount,
    #[serde(default)]
    pub fee: Amount,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_time_secs: Option<u64>,
}

/// Ordered hop sequence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub path: Vec<RouteStep>,
}

impl Route {
    pub fn new(path: Vec<RouteStep>) -> Self {
        Self { id: None, path }
    }

    pub fn first(&self) -> Option<&RouteStep> {
        self.path.first()
    }

    pub fn last(&self) -> Option<&RouteStep> {
        self.path.last()
    }

    pub fn total_fee(&self) -> Amount {
        self.path.iter().fold(Amount::ZERO, |acc, s| acc + s.fee)
    }

    pub fn estimated_time(&self) -> Duration {
        Duration::from_secs(
            self.path
                .iter()
                .filter_map(|s| s.estimated_time_secs)
                .sum(),
        )
    }

    /// Ranking key: cheaper first, then faster, then fewer hops
    pub fn cost(&self) -> (Amount, Duration, usize) {
        (self.total_fee(), self.estimated_time(), self.path.len())
    }

    /// Check that consecutive hops chain on both network and asset
    pub fn check_continuity(&self) -> Result<(), String> {
        if self.path.is_empty() {
            return Err("route has no steps".to_string());
        }

        for (i, pair) in self.path.windows(2).enumerate() {
            let (prev, next) = (&pair[0], &pair[1]);
            if prev.to_chain != next.from_chain {
                return Err(format!(
                    "step {} ends on {} but step {} starts on {}",
                    i,
                    prev.to_chain,
                    i + 1,
                    next.from_chain
                ));
            }
            if !prev.to_asset.eq_ignore_ascii_case(&next.from_asset) {
                return Err(format!(
                    "step {} yields {} but step {} spends {}",
                    i,
                    prev.to_asset,
                    i + 1,
                    next.from_asset
                ));
            }
        }

        Ok(())
    }

    /// Continuity plus matching the requested endpoints
    pub fn check_against(&self, params: &RouteParams) -> Result<(), String> {
        self.check_continuity()?;

        let (first, last) = match (self.first(), self.last()) {
            (Some(f), Some(l)) => (f, l),
            _ => return Err("route has no steps".to_string()),
        };
        if first.from_chain != params.from_chain || last.to_chain != params.to_chain {
            return Err(format!(
                "route runs {} -> {}, requested {} -> {}",
                first.from_chain, last.to_chain, params.from_chain, params.to_chain
            ));
        }
        if !first.from_asset.eq_ignore_ascii_case(&params.from_token)
            || !last.to_asset.eq_ignore_ascii_case(&params.to_token)
        {
            return Err(format!(
                "route swaps {} -> {}, requested {} -> {}",
                first.from_asset, last.to_asset, params.from_token, params.to_token
            ));
        }

        Ok(())
    }
}

/// Route request endpoints and constraints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteParams {
    pub from_chain: ChainId,
    pub to_chain: ChainId,
    pub from_token: TokenId,
    pub to_token: TokenId,
    pub amount: Amount,
}

impl RouteParams {
    fn validate(&self) -> TransferResult<()> {
        if self.from_chain.is_empty() {
            return Err(TransferError::validation(
                SelectionField::SourceChain,
                "is required",
            ));
        }
        if self.to_chain.is_empty() {
            return Err(TransferError::validation(
                SelectionField::DestinationChain,
                "is required",
            ));
        }
        if self.from_token.is_empty() || self.to_token.is_empty() {
            return Err(TransferError::validation(SelectionField::Token, "is required"));
        }
        if self.from_chain == self.to_chain && self.from_token.eq_ignore_ascii_case(&self.to_token)
        {
            return Err(TransferError::validation(
                SelectionField::DestinationChain,
                "route would not move anything",
            ));
        }
        if self.amount.is_zero() {
            return Err(TransferError::validation(
                SelectionField::Amount,
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct FindRoutesResponse {
    #[serde(default)]
    routes: Vec<Route>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BridgeQuoteResponse {
    to_amount: Amount,
    #[serde(default)]
    fee: Amount,
    #[serde(default)]
    estimated_time_secs: Option<u64>,
}

/// Validate, rank and trim raw routes against the request
pub fn normalize_routes(
    params: &RouteParams,
    raw: Vec<Route>,
    max_routes: usize,
) -> TransferResult<Vec<Route>> {
    let offered = raw.len();
    let mut first_rejection = None;

    let mut routes: Vec<Route> = raw
        .into_iter()
        .filter(|route| match route.check_against(params) {
            Ok(()) => true,
            Err(reason) => {
                warn!("Rejecting route {:?}: {}", route.id, reason);
                crate::metrics::record_route_rejected();
                first_rejection.get_or_insert(reason);
                false
            }
        })
        .collect();

    if routes.is_empty() {
        let detail = match first_rejection {
            Some(reason) => format!(
                "{} -> {}: {} route(s) offered, none valid ({})",
                params.from_chain, params.to_chain, offered, reason
            ),
            None => format!("{} -> {}", params.from_chain, params.to_chain),
        };
        return Err(TransferError::RouteComposition(detail));
    }

    // stable: equal cost keeps the quote service's order
    routes.sort_by_key(Route::cost);
    routes.truncate(max_routes.max(1));

    crate::metrics::record_routes_composed(routes.len());
    Ok(routes)
}

/// Query-only route discovery
pub struct RouteComposer {
    channel: Arc<dyn MessageChannel>,
    config: RoutingConfig,
}

impl RouteComposer {
    pub fn new(channel: Arc<dyn MessageChannel>, config: RoutingConfig) -> Self {
        Self { channel, config }
    }

    /// Ask the quote service for routes and keep the valid ones, cheapest first
    pub async fn compose_routes(&self, params: &RouteParams) -> TransferResult<Vec<Route>> {
        params.validate()?;

        let response: FindRoutesResponse =
            channel::request(self.channel.as_ref(), MessageType::FindRoutes, params).await?;

        debug!(
            "FIND_ROUTES {} -> {} returned {} routes",
            params.from_chain,
            params.to_chain,
            response.routes.len()
        );

        let routes = normalize_routes(params, response.routes, self.config.max_routes)?;
        info!(
            "Composed {} routes {}:{} -> {}:{}",
            routes.len(),
            params.from_chain,
            params.from_token,
            params.to_chain,
            params.to_token
        );
        Ok(routes)
    }

    /// Single-hop bridge routes built from catalog data alone
    pub fn direct_routes(&self, catalog: &RouteCatalog, params: &RouteParams) -> Vec<Route> {
        if !params.from_token.eq_ignore_ascii_case(&params.to_token) {
            return Vec::new();
        }
        let Some(token) = catalog.token(&params.from_token) else {
            return Vec::new();
        };

        let raw: Vec<Route> = catalog
            .providers()
            .iter()
            .filter(|p| catalog.is_legal_route(&params.from_chain, &params.to_chain, token, p))
            .map(|p| {
                let fee = p.fee_for(&token.id);
                Route::new(vec![RouteStep {
                    step_type: StepType::Bridge,
                    provider: Some(p.id.clone()),
                    from_chain: params.from_chain.clone(),
                    to_chain: params.to_chain.clone(),
                    from_asset: token.id.clone(),
                    to_asset: token.id.clone(),
                    from_amount: params.amount,
                    to_amount: Amount(params.amount.0.saturating_sub(fee.0)),
                    fee,
                    estimated_time_secs: p
                        .estimated_time(&params.from_chain, &params.to_chain)
                        .map(|d| d.as_secs()),
                }])
            })
            .collect();

        normalize_routes(params, raw, self.config.max_routes).unwrap_or_default()
    }

    /// Quote one provider lane; the result is a one-step route
    pub async fn get_bridge_quote(&self, request: &BridgeTransferRequest) -> TransferResult<Route> {
        request.validate()?;

        let quote: BridgeQuoteResponse =
            channel::request(self.channel.as_ref(), MessageType::GetBridgeQuote, request).await?;

        let params = RouteParams {
            from_chain: request.source_chain.clone(),
            to_chain: request.destination_chain.clone(),
            from_token: request.token.clone(),
            to_token: request.token.clone(),
            amount: request.amount,
        };
        let route = Route::new(vec![RouteStep {
            step_type: StepType::Bridge,
            provider: Some(request.provider.clone()),
            from_chain: params.from_chain.clone(),
            to_chain: params.to_chain.clone(),
            from_asset: params.from_token.clone(),
            to_asset: params.to_token.clone(),
            from_amount: request.amount,
            to_amount: quote.to_amount,
            fee: quote.fee,
            estimated_time_secs: quote.estimated_time_secs,
        }]);

        normalize_routes(&params, vec![route], 1)?
            .pop()
            .ok_or_else(|| TransferError::RouteComposition("empty quote".to_string()))
    }
}
