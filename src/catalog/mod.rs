//! Route catalog - reference data for chains, tokens and bridge providers
//!
//! The catalog answers one question: is a (source, destination, token,
//! provider) tuple a legal transfer route. Iteration order of every list is
//! the order the data was loaded in, which keeps auto-selection deterministic.

mod amount;

pub use amount::Amount;

use crate::channel::{self, MessageChannel, MessageType};
use crate::config::CatalogConfig;
use crate::error::TransferResult;

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};

pub type ChainId = String;
pub type TokenId = String;
pub type ProviderId = String;

/// Blockchain network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chain {
    #[serde(alias = "chain_id")]
    pub id: ChainId,
    pub name: String,
    #[serde(alias = "native_symbol")]
    pub native_symbol: String,
    #[serde(default, alias = "is_testnet")]
    pub is_testnet: bool,
}

/// Token tradable on a set of chains
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Token {
    pub id: TokenId,
    pub symbol: String,
    pub decimals: u8,
    pub networks: Vec<ChainId>,
    #[serde(default, alias = "balance_by_chain")]
    pub balance_by_chain: HashMap<ChainId, Amount>,
}

impl Token {
    pub fn is_on(&self, chain: &str) -> bool {
        self.networks.iter().any(|n| n == chain)
    }

    pub fn balance_on(&self, chain: &str) -> Amount {
        self.balance_by_chain.get(chain).copied().unwrap_or_default()
    }
}

/// One (source, destination) lane a provider serves
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupportedRoute {
    #[serde(alias = "source_chain")]
    pub source_chain: ChainId,
    #[serde(alias = "destination_chain")]
    pub destination_chain: ChainId,
    pub tokens: Vec<TokenId>,
}

impl SupportedRoute {
    fn serves(&self, source: &str, destination: &str) -> bool {
        self.source_chain == source && self.destination_chain == destination
    }
}

/// Estimated completion time for a chain pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteEstimate {
    #[serde(alias = "source_chain")]
    pub source_chain: ChainId,
    #[serde(alias = "destination_chain")]
    pub destination_chain: ChainId,
    pub seconds: u64,
}

/// Third-party bridge provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Provider {
    pub id: ProviderId,
    pub name: String,
    #[serde(default, alias = "supported_routes")]
    pub supported_routes: Vec<SupportedRoute>,
    #[serde(default, alias = "fee_by_token")]
    pub fee_by_token: HashMap<TokenId, Amount>,
    #[serde(default, alias = "estimated_times")]
    pub estimated_times: Vec<RouteEstimate>,
}

impl Provider {
    /// Whether this provider carries `token` from `source` to `destination`
    pub fn supports(&self, source: &str, destination: &str, token: &str) -> bool {
        self.supported_routes
            .iter()
            .any(|r| r.serves(source, destination) && r.tokens.iter().any(|t| t == token))
    }

    pub fn fee_for(&self, token: &str) -> Amount {
        self.fee_by_token.get(token).copied().unwrap_or_default()
    }

    pub fn estimated_time(&self, source: &str, destination: &str) -> Option<Duration> {
        self.estimated_times
            .iter()
            .find(|e| e.source_chain == source && e.destination_chain == destination)
            .map(|e| Duration::from_secs(e.seconds))
    }
}

/// Loaded reference data plus the route legality predicate
#[derive(Debug, Clone, Default)]
pub struct RouteCatalog {
    chains: Vec<Chain>,
    tokens: Vec<Token>,
    providers: Vec<Provider>,
}

impl RouteCatalog {
    pub fn new(chains: Vec<Chain>, tokens: Vec<Token>, providers: Vec<Provider>) -> Self {
        Self {
            chains,
            tokens,
            providers,
        }
    }

    pub fn from_config(config: &CatalogConfig) -> Self {
        Self::new(
            config.chains.clone(),
            config.tokens.clone(),
            config.providers.clone(),
        )
    }

    pub fn chains(&self) -> &[Chain] {
        &self.chains
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    pub fn providers(&self) -> &[Provider] {
        &self.providers
    }

    pub fn chain(&self, id: &str) -> Option<&Chain> {
        self.chains.iter().find(|c| c.id == id)
    }

    pub fn token(&self, id: &str) -> Option<&Token> {
        self.tokens.iter().find(|t| t.id == id)
    }

    pub fn provider(&self, id: &str) -> Option<&Provider> {
        self.providers.iter().find(|p| p.id == id)
    }

    /// Legality predicate for a transfer route.
    ///
    /// True iff the provider lists the lane with this token, the token lives
    /// on both chains, and the chains differ.
    pub fn is_legal_route(
        &self,
        source: &str,
        destination: &str,
        token: &Token,
        provider: &Provider,
    ) -> bool {
        source != destination
            && token.is_on(source)
            && token.is_on(destination)
            && provider.supports(source, destination, &token.id)
    }

    /// Same as [`is_legal_route`](Self::is_legal_route) but by id; unknown ids are illegal
    pub fn is_legal_route_by_id(
        &self,
        source: &str,
        destination: &str,
        token: &str,
        provider: &str,
    ) -> bool {
        match (self.token(token), self.provider(provider)) {
            (Some(t), Some(p)) => self.is_legal_route(source, destination, t, p),
            _ => false,
        }
    }

    /// Replace provider data with the remote's current list
    pub async fn refresh_providers(&mut self, channel: &dyn MessageChannel) -> TransferResult<()> {
        let providers: Vec<Provider> =
            channel::request(channel, MessageType::GetBridgeProviders, &json!({})).await?;

        info!("Loaded {} bridge providers", providers.len());
        self.providers = providers;
        Ok(())
    }

    /// Record a fresh balance for a token on a chain
    pub fn set_balance(&mut self, token: &str, chain: &str, amount: Amount) -> bool {
        match self.tokens.iter_mut().find(|t| t.id == token) {
            Some(t) => {
                debug!("Balance of {} on {} is now {}", token, chain, amount);
                t.balance_by_chain.insert(chain.to_string(), amount);
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn chain(id: &str) -> Chain {
        Chain {
            id: id.to_string(),
            name: format!("Chain {}", id),
            native_symbol: id.to_uppercase(),
            is_testnet: false,
        }
    }

    pub fn token(id: &str, networks: &[&str], balances: &[(&str, u128)]) -> Token {
        Token {
            id: id.to_string(),
            symbol: id.to_uppercase(),
            decimals: 6,
            networks: networks.iter().map(|n| n.to_string()).collect(),
            balance_by_chain: balances
                .iter()
                .map(|(c, a)| (c.to_string(), Amount(*a)))
                .collect(),
        }
    }

    pub fn provider(id: &str, lanes: &[(&str, &str, &[&str])]) -> Provider {
        Provider {
            id: id.to_string(),
            name: format!("Provider {}", id),
            supported_routes: lanes
                .iter()
                .map(|(s, d, tokens)| SupportedRoute {
                    source_chain: s.to_string(),
                    destination_chain: d.to_string(),
                    tokens: tokens.iter().map(|t| t.to_string()).collect(),
                })
                .collect(),
            fee_by_token: HashMap::new(),
            estimated_times: Vec::new(),
        }
    }

    /// Chains A, B, C; USDX on A and B; P1 serves A->B, P2 serves A->C only
    pub fn scenario_catalog() -> RouteCatalog {
        RouteCatalog::new(
            vec![chain("a"), chain("b"), chain("c")],
            vec![
                token("usdx", &["a", "b"], &[("a", 1_000_000)]),
                token("wbtc", &["a", "c"], &[("a", 50)]),
            ],
            vec![
                provider("p1", &[("a", "b", &["usdx"])]),
                provider("p2", &[("a", "c", &["usdx", "wbtc"])]),
            ],
        )
    }
}
