//! Route selector - cascading constraint resolution for a transfer form
//!
//! Fields are fixed in order source -> destination -> token -> provider.
//! Every event runs through [`reduce`], which recomputes the valid options
//! downstream of the changed field and repairs any selection the change
//! invalidated. Whenever something must be picked automatically, the first
//! option in catalog order wins.

use crate::catalog::{Amount, ChainId, ProviderId, RouteCatalog, TokenId};
use crate::error::{TransferError, TransferResult};
use crate::transfer::BridgeTransferRequest;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Form field a validation error is attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SelectionField {
    SourceChain,
    DestinationChain,
    Token,
    Provider,
    Amount,
}

impl fmt::Display for SelectionField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SelectionField::SourceChain => "source chain",
            SelectionField::DestinationChain => "destination chain",
            SelectionField::Token => "token",
            SelectionField::Provider => "provider",
            SelectionField::Amount => "amount",
        };
        f.write_str(name)
    }
}

/// Working state of one in-progress transfer form
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingSelection {
    pub source_chain: Option<ChainId>,
    pub destination_chain: Option<ChainId>,
    pub token: Option<TokenId>,
    pub provider: Option<ProviderId>,
}

/// Field-set events, in the order a form normally fires them
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionEvent {
    SetSource(ChainId),
    SetDestination(ChainId),
    SetToken(TokenId),
    SetProvider(ProviderId),
    /// Exchange source and destination
    Swap,
    Reset,
}

/// Selection plus the options currently valid for each downstream field
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectorState {
    pub selection: PendingSelection,
    pub valid_destinations: Vec<ChainId>,
    pub valid_tokens: Vec<TokenId>,
    pub valid_providers: Vec<ProviderId>,
}

/// Destinations reachable from `source` with at least one legal (token, provider)
pub fn valid_destinations(catalog: &RouteCatalog, source: &str) -> Vec<ChainId> {
    catalog
        .chains()
        .iter()
        .filter(|d| d.id != source)
        .filter(|d| {
            catalog.providers().iter().any(|p| {
                catalog
                    .tokens()
                    .iter()
                    .any(|t| catalog.is_legal_route(source, &d.id, t, p))
            })
        })
        .map(|d| d.id.clone())
        .collect()
}

/// Tokens present on both chains with at least one provider for the lane
pub fn valid_tokens(catalog: &RouteCatalog, source: &str, destination: &str) -> Vec<TokenId> {
    catalog
        .tokens()
        .iter()
        .filter(|t| {
            catalog
                .providers()
                .iter()
                .any(|p| catalog.is_legal_route(source, destination, t, p))
        })
        .map(|t| t.id.clone())
        .collect()
}

/// Providers that legally carry `token` from `source` to `destination`
pub fn valid_providers(
    catalog: &RouteCatalog,
    source: &str,
    destination: &str,
    token: &str,
) -> Vec<ProviderId> {
    let Some(token) = catalog.token(token) else {
        return Vec::new();
    };

    catalog
        .providers()
        .iter()
        .filter(|p| catalog.is_legal_route(source, destination, token, p))
        .map(|p| p.id.clone())
        .collect()
}

/// Keep `current` if it is among `valid`, otherwise fall back to the first option
fn repair(current: Option<String>, valid: &[String], field: SelectionField) -> Option<String> {
    match current {
        Some(value) if valid.contains(&value) => Some(value),
        previous => {
            let next = valid.first().cloned();
            if previous.is_some() || next.is_some() {
                debug!("Auto-selected {}: {:?} -> {:?}", field, previous, next);
            }
            next
        }
    }
}

/// Recompute the option lists without touching the selection
fn refresh_options(catalog: &RouteCatalog, state: &mut SelectorState) {
    let sel = &state.selection;

    state.valid_destinations = match &sel.source_chain {
        Some(source) => valid_destinations(catalog, source),
        None => Vec::new(),
    };
    state.valid_tokens = match (&sel.source_chain, &sel.destination_chain) {
        (Some(source), Some(destination)) => valid_tokens(catalog, source, destination),
        _ => Vec::new(),
    };
    state.valid_providers = match (&sel.source_chain, &sel.destination_chain, &sel.token) {
        (Some(source), Some(destination), Some(token)) => {
            valid_providers(catalog, source, destination, token)
        }
        _ => Vec::new(),
    };
}

/// Repair every field from `from` downwards, recomputing options as it goes
fn cascade(catalog: &RouteCatalog, state: &mut SelectorState, from: SelectionField) {
    let order = [
        SelectionField::DestinationChain,
        SelectionField::Token,
        SelectionField::Provider,
    ];

    for field in order.into_iter().skip_while(|f| *f != from) {
        refresh_options(catalog, state);
        let sel = &mut state.selection;
        match field {
            SelectionField::DestinationChain => {
                sel.destination_chain = repair(
                    sel.destination_chain.take(),
                    &state.valid_destinations,
                    field,
                );
            }
            SelectionField::Token => {
                sel.token = repair(sel.token.take(), &state.valid_tokens, field);
            }
            SelectionField::Provider => {
                sel.provider = repair(sel.provider.take(), &state.valid_providers, field);
            }
            _ => {}
        }
    }

    refresh_options(catalog, state);
}

/// Apply one event to a selector state
pub fn reduce(catalog: &RouteCatalog, state: &SelectorState, event: SelectionEvent) -> SelectorState {
    let mut next = state.clone();

    match event {
        SelectionEvent::SetSource(source) => {
            next.selection.source_chain = Some(source);
            cascade(catalog, &mut next, SelectionField::DestinationChain);
        }
        SelectionEvent::SetDestination(destination) => {
            next.selection.destination_chain = Some(destination);
            if next.selection.source_chain.is_some() {
                cascade(catalog, &mut next, SelectionField::DestinationChain);
            } else {
                refresh_options(catalog, &mut next);
            }
        }
        SelectionEvent::SetToken(token) => {
            next.selection.token = Some(token);
            cascade(catalog, &mut next, SelectionField::Token);
        }
        SelectionEvent::SetProvider(provider) => {
            next.selection.provider = Some(provider);
            cascade(catalog, &mut next, SelectionField::Provider);
        }
        SelectionEvent::Swap => {
            let sel = &mut next.selection;
            if sel.source_chain.is_some() && sel.destination_chain.is_some() {
                std::mem::swap(&mut sel.source_chain, &mut sel.destination_chain);
                // The reverse lane may not exist, so token and provider start over
                sel.token = None;
                sel.provider = None;
            }
            refresh_options(catalog, &mut next);
        }
        SelectionEvent::Reset => {
            next = SelectorState::default();
        }
    }

    next
}

/// Check a selection and amount before anything is sent to the remote
pub fn validate(
    catalog: &RouteCatalog,
    selection: &PendingSelection,
    amount: &str,
) -> TransferResult<BridgeTransferRequest> {
    let source = required(&selection.source_chain, SelectionField::SourceChain)?;
    let destination = required(&selection.destination_chain, SelectionField::DestinationChain)?;
    if source == destination {
        return Err(TransferError::validation(
            SelectionField::DestinationChain,
            "must differ from the source chain",
        ));
    }
    let token_id = required(&selection.token, SelectionField::Token)?;
    let provider_id = required(&selection.provider, SelectionField::Provider)?;

    let token = catalog
        .token(token_id)
        .ok_or_else(|| TransferError::validation(SelectionField::Token, "unknown token"))?;
    if !catalog.is_legal_route_by_id(source, destination, token_id, provider_id) {
        return Err(TransferError::validation(
            SelectionField::Provider,
            format!(
                "{} does not carry {} from {} to {}",
                provider_id, token.symbol, source, destination
            ),
        ));
    }

    let amount = Amount::parse_units(amount, token.decimals)
        .map_err(|e| TransferError::validation(SelectionField::Amount, e))?;
    if amount.is_zero() {
        return Err(TransferError::validation(
            SelectionField::Amount,
            "must be greater than zero",
        ));
    }
    let balance = token.balance_on(source);
    if amount > balance {
        return Err(TransferError::validation(
            SelectionField::Amount,
            format!(
                "exceeds available balance of {} {}",
                balance.format_units(token.decimals),
                token.symbol
            ),
        ));
    }

    Ok(BridgeTransferRequest {
        provider: provider_id.clone(),
        source_chain: source.clone(),
        destination_chain: destination.clone(),
        token: token_id.clone(),
        amount,
        recipient: None,
        owner: None,
    })
}

fn required(value: &Option<String>, field: SelectionField) -> TransferResult<&String> {
    value
        .as_ref()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| TransferError::validation(field, "is required"))
}

/// Stateful wrapper owning one form's selection
#[derive(Debug, Clone)]
pub struct RouteSelector {
    catalog: Arc<RouteCatalog>,
    state: SelectorState,
}

impl RouteSelector {
    pub fn new(catalog: Arc<RouteCatalog>) -> Self {
        Self {
            catalog,
            state: SelectorState::default(),
        }
    }

    /// Open a form with the source preselected
    pub fn with_source(catalog: Arc<RouteCatalog>, source: impl Into<ChainId>) -> Self {
        let mut selector = Self::new(catalog);
        selector.apply(SelectionEvent::SetSource(source.into()));
        selector
    }

    pub fn apply(&mut self, event: SelectionEvent) -> &SelectorState {
        self.state = reduce(&self.catalog, &self.state, event);
        &self.state
    }

    pub fn set_source(&mut self, chain: impl Into<ChainId>) -> &SelectorState {
        self.apply(SelectionEvent::SetSource(chain.into()))
    }

    pub fn set_destination(&mut self, chain: impl Into<ChainId>) -> &SelectorState {
        self.apply(SelectionEvent::SetDestination(chain.into()))
    }

    pub fn set_token(&mut self, token: impl Into<TokenId>) -> &SelectorState {
        self.apply(SelectionEvent::SetToken(token.into()))
    }

    pub fn set_provider(&mut self, provider: impl Into<ProviderId>) -> &SelectorState {
        self.apply(SelectionEvent::SetProvider(provider.into()))
    }

    pub fn swap(&mut self) -> &SelectorState {
        self.apply(SelectionEvent::Swap)
    }

    pub fn state(&self) -> &SelectorState {
        &self.state
    }

    pub fn selection(&self) -> &PendingSelection {
        &self.state.selection
    }

    /// Validate the form; on success the selection is ready to submit
    pub fn validate(&self, amount: &str) -> TransferResult<BridgeTransferRequest> {
        validate(&self.catalog, &self.state.selection, amount)
    }
}
