//! Layered name resolution: curated local mapping, learned cache, then a
//! concurrent race across the remote character databases.
//!
//! The resolver is the only writer to the learned mapping and owns the
//! persisted snapshot file. Remote failures are per-service misses, never
//! resolution failures; a rate-limit response parks the offending service
//! for a cooldown.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};

use crate::arabic;
use crate::config::ResolverConfig;

/// Curated names that ship with the system. The state file may extend or
/// override these; keys are stored normalized.
const BUILTIN_LOCAL: &[(&str, &str)] = &[
    ("غوكو", "Goku"),
    ("فيجيتا", "Vegeta"),
    ("ناروتو", "Naruto"),
    ("ساسكي", "Sasuke"),
    ("لوفي", "Luffy"),
    ("زورو", "Zoro"),
    ("ايتاتشي", "Itachi"),
    ("غون", "Gon"),
    ("كيلوا", "Killua"),
    ("ليفاي", "Levi"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupService {
    AniList,
    Jikan,
    Kitsu,
}

impl LookupService {
    pub fn label(self) -> &'static str {
        match self {
            LookupService::AniList => "AniList",
            LookupService::Jikan => "Jikan",
            LookupService::Kitsu => "Kitsu",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameSource {
    Local,
    Learned,
    Remote(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedName {
    pub name: String,
    pub confidence: f32,
    pub source: NameSource,
}

/// A learned entry as persisted: the canonical name plus where it came from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearnedName {
    pub name: String,
    pub confidence: f32,
    pub service: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct MappingFile {
    #[serde(default)]
    local_names: HashMap<String, String>,
    #[serde(default)]
    learned_names: HashMap<String, LearnedName>,
    #[serde(default)]
    last_updated: Option<DateTime<Utc>>,
}

enum ServiceOutcome {
    Hit { name: String, confidence: f32 },
    Miss,
    RateLimited { retry_after: Option<u64> },
}

pub struct NameResolver {
    config: ResolverConfig,
    client: reqwest::Client,
    state_path: PathBuf,
    local: HashMap<String, String>,
    learned: HashMap<String, LearnedName>,
    cooldown_until: HashMap<LookupService, Instant>,
}

impl NameResolver {
    /// Read the persisted snapshot (missing or corrupt file falls back to
    /// the built-in local table and an empty learned cache) and verify the
    /// state path is writable. The write probe is the one place resolver
    /// errors propagate: an unwritable path is a startup configuration
    /// error.
    pub fn load(config: ResolverConfig, state_path: PathBuf) -> Result<Self> {
        let mut local: HashMap<String, String> = BUILTIN_LOCAL
            .iter()
            .map(|(k, v)| (arabic::normalize(k), v.to_string()))
            .collect();
        let mut learned = HashMap::new();

        match fs::read_to_string(&state_path) {
            Ok(contents) => match serde_json::from_str::<MappingFile>(&contents) {
                Ok(file) => {
                    for (key, name) in file.local_names {
                        local.insert(arabic::normalize(&key), name);
                    }
                    learned = file.learned_names;
                    tracing::info!(
                        "Loaded name mappings from {:?} ({} local, {} learned)",
                        state_path,
                        local.len(),
                        learned.len()
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        "Corrupt mapping file {:?} ({}), starting with built-ins",
                        state_path,
                        e
                    );
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No mapping file at {:?}, starting with built-ins", state_path);
            }
            Err(e) => {
                tracing::warn!("Failed to read {:?} ({}), starting with built-ins", state_path, e);
            }
        }

        let resolver = Self {
            config,
            client: reqwest::Client::new(),
            state_path,
            local,
            learned,
            cooldown_until: HashMap::new(),
        };
        resolver
            .persist_now()
            .with_context(|| format!("mapping state path {:?} is not writable", resolver.state_path))?;
        Ok(resolver)
    }

    pub fn learned_count(&self) -> usize {
        self.learned.len()
    }

    /// Resolve a raw token: local mapping, then learned cache, then the
    /// remote fan-out. Returns None when nobody knows the name.
    pub async fn resolve(&mut self, token: &str) -> Option<ResolvedName> {
        let key = arabic::normalize(token);

        if let Some(name) = self.local.get(&key) {
            return Some(ResolvedName {
                name: name.clone(),
                confidence: 1.0,
                source: NameSource::Local,
            });
        }

        if let Some(entry) = self.learned.get(&key) {
            return Some(ResolvedName {
                name: entry.name.clone(),
                confidence: entry.confidence,
                source: NameSource::Learned,
            });
        }

        let (service, name, confidence) = self.lookup_remote(token).await?;
        self.learn(
            key,
            LearnedName {
                name: name.clone(),
                confidence,
                service: service.label().to_string(),
            },
        );
        Some(ResolvedName {
            name,
            confidence,
            source: NameSource::Remote(service.label().to_string()),
        })
    }

    /// Race every service not on cooldown and pick the best settled answer:
    /// highest confidence, ties to the earlier service in configured order.
    async fn lookup_remote(&mut self, token: &str) -> Option<(LookupService, String, f32)> {
        let now = Instant::now();
        let candidates: Vec<LookupService> = self
            .config
            .services
            .iter()
            .copied()
            .filter(|s| {
                self.cooldown_until
                    .get(s)
                    .map(|until| *until <= now)
                    .unwrap_or(true)
            })
            .collect();
        if candidates.is_empty() {
            return None;
        }

        let this: &Self = self;
        let outcomes = join_all(
            candidates
                .iter()
                .map(|&service| this.query_service(service, token)),
        )
        .await;

        let mut best: Option<(LookupService, String, f32)> = None;
        for (service, outcome) in candidates.into_iter().zip(outcomes) {
            match outcome {
                ServiceOutcome::Hit { name, confidence } => {
                    let better = best
                        .as_ref()
                        .map(|(_, _, c)| confidence > *c)
                        .unwrap_or(true);
                    if better {
                        best = Some((service, name, confidence));
                    }
                }
                ServiceOutcome::Miss => {}
                ServiceOutcome::RateLimited { retry_after } => {
                    let cooldown = retry_after
                        .map(Duration::from_secs)
                        .unwrap_or_else(|| self.config.default_cooldown());
                    tracing::warn!(
                        "{} rate limited, cooling down for {:?}",
                        service.label(),
                        cooldown
                    );
                    self.cooldown_until.insert(service, Instant::now() + cooldown);
                }
            }
        }
        best
    }

    async fn query_service(&self, service: LookupService, token: &str) -> ServiceOutcome {
        let result = match service {
            LookupService::AniList => self.query_anilist(token).await,
            LookupService::Jikan => self.query_jikan(token).await,
            LookupService::Kitsu => self.query_kitsu(token).await,
        };
        match result {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::debug!("{} lookup failed for {:?}: {}", service.label(), token, e);
                ServiceOutcome::Miss
            }
        }
    }

    fn rate_limit_outcome(resp: &reqwest::Response) -> Option<ServiceOutcome> {
        if resp.status() != reqwest::StatusCode::TOO_MANY_REQUESTS {
            return None;
        }
        let retry_after = resp
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok());
        Some(ServiceOutcome::RateLimited { retry_after })
    }

    async fn query_anilist(&self, token: &str) -> Result<ServiceOutcome> {
        #[derive(Deserialize)]
        struct Response {
            data: Option<Data>,
        }
        #[derive(Deserialize)]
        struct Data {
            #[serde(rename = "Character")]
            character: Option<Character>,
        }
        #[derive(Deserialize)]
        struct Character {
            name: CharacterName,
        }
        #[derive(Deserialize)]
        struct CharacterName {
            full: Option<String>,
            native: Option<String>,
        }

        let query =
            "query ($search: String) { Character(search: $search) { name { full native } id } }";
        let payload = serde_json::json!({
            "query": query,
            "variables": { "search": token }
        });

        let resp = self
            .client
            .post("https://graphql.anilist.co/")
            .timeout(self.config.request_timeout())
            .json(&payload)
            .send()
            .await
            .context("AniList request failed")?;
        if let Some(limited) = Self::rate_limit_outcome(&resp) {
            return Ok(limited);
        }
        if !resp.status().is_success() {
            anyhow::bail!("AniList returned HTTP {}", resp.status());
        }

        let body: Response = resp.json().await.context("AniList payload malformed")?;
        let name = body
            .data
            .and_then(|d| d.character)
            .and_then(|c| c.name.full.or(c.name.native));
        Ok(match name {
            Some(name) => ServiceOutcome::Hit {
                name,
                confidence: 0.9,
            },
            None => ServiceOutcome::Miss,
        })
    }

    async fn query_jikan(&self, token: &str) -> Result<ServiceOutcome> {
        #[derive(Deserialize)]
        struct Response {
            #[serde(default)]
            data: Vec<Entry>,
        }
        #[derive(Deserialize)]
        struct Entry {
            name: Option<String>,
        }

        let resp = self
            .client
            .get("https://api.jikan.moe/v4/characters")
            .timeout(self.config.request_timeout())
            .query(&[("q", token), ("limit", "1")])
            .send()
            .await
            .context("Jikan request failed")?;
        if let Some(limited) = Self::rate_limit_outcome(&resp) {
            return Ok(limited);
        }
        if !resp.status().is_success() {
            anyhow::bail!("Jikan returned HTTP {}", resp.status());
        }

        let body: Response = resp.json().await.context("Jikan payload malformed")?;
        Ok(match body.data.into_iter().next().and_then(|e| e.name) {
            Some(name) => ServiceOutcome::Hit {
                name,
                confidence: 0.8,
            },
            None => ServiceOutcome::Miss,
        })
    }

    async fn query_kitsu(&self, token: &str) -> Result<ServiceOutcome> {
        #[derive(Deserialize)]
        struct Response {
            #[serde(default)]
            data: Vec<Entry>,
        }
        #[derive(Deserialize)]
        struct Entry {
            attributes: Attributes,
        }
        #[derive(Deserialize)]
        struct Attributes {
            name: Option<String>,
            #[serde(rename = "canonicalName")]
            canonical_name: Option<String>,
        }

        let resp = self
            .client
            .get("https://kitsu.io/api/edge/characters")
            .timeout(self.config.request_timeout())
            .query(&[("filter[name]", token), ("page[limit]", "1")])
            .send()
            .await
            .context("Kitsu request failed")?;
        if let Some(limited) = Self::rate_limit_outcome(&resp) {
            return Ok(limited);
        }
        if !resp.status().is_success() {
            anyhow::bail!("Kitsu returned HTTP {}", resp.status());
        }

        let body: Response = resp.json().await.context("Kitsu payload malformed")?;
        let name = body
            .data
            .into_iter()
            .next()
            .and_then(|e| e.attributes.name.or(e.attributes.canonical_name));
        Ok(match name {
            Some(name) => ServiceOutcome::Hit {
                name,
                confidence: 0.8,
            },
            None => ServiceOutcome::Miss,
        })
    }

    /// Insert-or-overwrite a learned entry and persist the snapshot in the
    /// background. Persist failure is logged, never propagated.
    fn learn(&mut self, key: String, entry: LearnedName) {
        self.learned.insert(key, entry);

        let snapshot = self.snapshot_json();
        let path = self.state_path.clone();
        tokio::task::spawn_blocking(move || match snapshot {
            Ok(contents) => {
                if let Err(e) = fs::write(&path, contents) {
                    tracing::warn!("Failed to persist name mappings to {:?}: {}", path, e);
                }
            }
            Err(e) => tracing::warn!("Failed to serialize name mappings: {}", e),
        });
    }

    /// Synchronous whole-file overwrite; used by the startup write probe.
    pub fn persist_now(&self) -> Result<()> {
        let contents = self.snapshot_json()?;
        fs::write(&self.state_path, contents)
            .with_context(|| format!("Failed to write {:?}", self.state_path))?;
        Ok(())
    }

    fn snapshot_json(&self) -> Result<String> {
        let file = MappingFile {
            local_names: self.local.clone(),
            learned_names: self.learned.clone(),
            last_updated: Some(Utc::now()),
        };
        serde_json::to_string_pretty(&file).context("Failed to serialize name mappings")
    }

    #[cfg(test)]
    fn insert_local(&mut self, key: &str, name: &str) {
        self.local
            .insert(arabic::normalize(key), name.to_string());
    }

    #[cfg(test)]
    fn insert_learned(&mut self, key: &str, entry: LearnedName) {
        self.learned.insert(arabic::normalize(key), entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offline_config() -> ResolverConfig {
        ResolverConfig {
            services: Vec::new(),
            ..ResolverConfig::default()
        }
    }

    fn resolver_in(dir: &std::path::Path) -> NameResolver {
        NameResolver::load(offline_config(), dir.join("mappings.json")).unwrap()
    }

    #[tokio::test]
    async fn local_mapping_wins_over_learned() {
        let dir = tempfile::tempdir().unwrap();
        let mut resolver = resolver_in(dir.path());
        resolver.insert_local("توكن", "Local Name");
        resolver.insert_learned(
            "توكن",
            LearnedName {
                name: "Learned Name".to_string(),
                confidence: 0.9,
                service: "Jikan".to_string(),
            },
        );

        let resolved = resolver.resolve("توكن").await.unwrap();
        assert_eq!(resolved.name, "Local Name");
        assert_eq!(resolved.source, NameSource::Local);
        assert_eq!(resolved.confidence, 1.0);
    }

    #[tokio::test]
    async fn learned_entries_serve_when_remotes_are_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let mut resolver = resolver_in(dir.path());
        resolver.insert_learned(
            "توكن",
            LearnedName {
                name: "Remote Name".to_string(),
                confidence: 0.8,
                service: "Kitsu".to_string(),
            },
        );

        let resolved = resolver.resolve("توكن").await.unwrap();
        assert_eq!(resolved.name, "Remote Name");
        assert_eq!(resolved.source, NameSource::Learned);
    }

    #[tokio::test]
    async fn unknown_token_with_no_services_resolves_to_none() {
        let dir = tempfile::tempdir().unwrap();
        let mut resolver = resolver_in(dir.path());
        assert!(resolver.resolve("مجهول").await.is_none());
    }

    #[tokio::test]
    async fn resolution_normalizes_token_variants() {
        let dir = tempfile::tempdir().unwrap();
        let mut resolver = resolver_in(dir.path());
        resolver.insert_local("ساسكي", "Sasuke");
        // Variant spelling with ى folds to the same key.
        let resolved = resolver.resolve("ساسكى").await.unwrap();
        assert_eq!(resolved.name, "Sasuke");
    }

    #[tokio::test]
    async fn write_through_round_trips_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mappings.json");

        {
            let mut resolver =
                NameResolver::load(offline_config(), path.clone()).unwrap();
            resolver.insert_learned(
                "كاكاشي",
                LearnedName {
                    name: "Kakashi".to_string(),
                    confidence: 0.9,
                    service: "AniList".to_string(),
                },
            );
            resolver.persist_now().unwrap();
        }

        let mut reloaded = NameResolver::load(offline_config(), path).unwrap();
        let resolved = reloaded.resolve("كاكاشي").await.unwrap();
        assert_eq!(resolved.name, "Kakashi");
        assert_eq!(resolved.source, NameSource::Learned);
        assert_eq!(reloaded.learned_count(), 1);
    }

    #[test]
    fn corrupt_state_file_falls_back_to_builtins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mappings.json");
        fs::write(&path, "{not json").unwrap();

        let resolver = NameResolver::load(offline_config(), path).unwrap();
        assert_eq!(resolver.learned_count(), 0);
        assert!(resolver.local.contains_key(&arabic::normalize("غوكو")));
    }

    #[test]
    fn unwritable_state_path_fails_fast() {
        let missing = PathBuf::from("/definitely/not/a/real/dir/mappings.json");
        assert!(NameResolver::load(offline_config(), missing).is_err());
    }

    #[test]
    fn builtin_local_keys_are_normalized() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = resolver_in(dir.path());
        for (key, _) in BUILTIN_LOCAL {
            assert!(resolver.local.contains_key(&arabic::normalize(key)));
        }
    }
}
