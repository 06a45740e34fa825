//! Store, weather, and competitor lookups for prompt context.
//!
//! The store directory and competitor list are read from `[lookup]` in the
//! config. Weather comes from an optional HTTP endpoint; if it is missing or
//! fails, a clearly labelled placeholder block is produced instead, so a
//! flaky weather service never fails a question.

use std::time::Duration;
use tracing::warn;

use crate::config::{CompetitorRecord, LookupConfig, StoreRecord};
use crate::crossref::{canonical_id, extract_patterns};
use crate::models::{ContextBlock, ContextSource, PatternKind};

pub struct LookupService {
    config: LookupConfig,
    client: reqwest::Client,
}

/// Weather for one city, possibly a placeholder.
#[derive(Debug, Clone)]
pub struct WeatherReport {
    pub city: String,
    pub text: String,
    pub placeholder: bool,
}

impl LookupService {
    pub fn new(config: &LookupConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            config: config.clone(),
            client,
        })
    }

    /// Stores whose id or city is mentioned in the question.
    pub fn stores_for(&self, question: &str) -> Vec<&StoreRecord> {
        let ids: Vec<String> = extract_patterns(question)
            .into_iter()
            .filter(|p| p.kind == PatternKind::StoreId)
            .map(|p| p.value)
            .collect();
        let lowered = question.to_lowercase();

        self.config
            .stores
            .iter()
            .filter(|s| {
                ids.iter().any(|id| *id == canonical_id(&s.id))
                    || lowered.contains(&s.city.to_lowercase())
                    || lowered.contains(&s.name.to_lowercase())
            })
            .collect()
    }

    pub fn competitors_in(&self, cities: &[String]) -> Vec<&CompetitorRecord> {
        self.config
            .competitors
            .iter()
            .filter(|c| cities.iter().any(|city| city.eq_ignore_ascii_case(&c.city)))
            .collect()
    }

    /// Cities referenced by the question, directly or through a store.
    pub fn cities_for(&self, question: &str) -> Vec<String> {
        let lowered = question.to_lowercase();
        let mut cities: Vec<String> = Vec::new();
        let known = self
            .config
            .stores
            .iter()
            .map(|s| &s.city)
            .chain(self.config.competitors.iter().map(|c| &c.city));
        for city in known {
            if lowered.contains(&city.to_lowercase()) && !cities.contains(city) {
                cities.push(city.clone());
            }
        }
        for store in self.stores_for(question) {
            if !cities.contains(&store.city) {
                cities.push(store.city.clone());
            }
        }
        cities
    }

    pub async fn weather(&self, city: &str) -> WeatherReport {
        let Some(url) = self.config.weather_url.as_deref() else {
            return placeholder_weather(city, "no weather service configured");
        };

        let result = async {
            let response = self
                .client
                .get(url)
                .query(&[("city", city)])
                .send()
                .await?
                .error_for_status()?;
            response.json::<serde_json::Value>().await
        }
        .await;

        match result {
            Ok(json) => WeatherReport {
                city: city.to_string(),
                text: render_weather(&json),
                placeholder: false,
            },
            Err(e) => {
                warn!(city, error = %e, "weather lookup failed; using placeholder");
                placeholder_weather(city, &e.to_string())
            }
        }
    }

    /// All external blocks relevant to the question.
    pub async fn lookup(&self, question: &str) -> Vec<ContextBlock> {
        let mut blocks = Vec::new();

        let stores = self.stores_for(question);
        if !stores.is_empty() {
            let lines: Vec<String> = stores.iter().map(|s| render_store(s)).collect();
            blocks.push(ContextBlock::new(
                ContextSource::ExternalApi,
                "store directory",
                lines.join("\n"),
            ));
        }

        let cities = self.cities_for(question);
        for city in &cities {
            let report = self.weather(city).await;
            let label = if report.placeholder {
                format!("weather: {} (placeholder)", report.city)
            } else {
                format!("weather: {}", report.city)
            };
            blocks.push(ContextBlock::new(ContextSource::ExternalApi, label, report.text));
        }

        let competitors = self.competitors_in(&cities);
        if !competitors.is_empty() {
            let lines: Vec<String> = competitors
                .iter()
                .map(|c| match &c.note {
                    Some(note) => format!("- {} ({}): {}", c.name, c.city, note),
                    None => format!("- {} ({})", c.name, c.city),
                })
                .collect();
            blocks.push(ContextBlock::new(
                ContextSource::ExternalApi,
                "competitors",
                lines.join("\n"),
            ));
        }

        blocks
    }
}

fn render_store(s: &StoreRecord) -> String {
    let mut line = format!("- {} | {} | {}", s.id, s.name, s.city);
    if let Some(region) = &s.region {
        line.push_str(&format!(" | region: {}", region));
    }
    if let Some(manager) = &s.manager {
        line.push_str(&format!(" | manager: {}", manager));
    }
    line
}

fn placeholder_weather(city: &str, reason: &str) -> WeatherReport {
    WeatherReport {
        city: city.to_string(),
        text: format!(
            "[PLACEHOLDER - live weather unavailable ({})] Assume typical seasonal conditions for {}.",
            reason, city
        ),
        placeholder: true,
    }
}

/// Flattens the common fields of a weather payload, falling back to raw JSON.
fn render_weather(json: &serde_json::Value) -> String {
    let fields = ["condition", "description", "temp_c", "temperature", "humidity", "forecast"];
    let parts: Vec<String> = fields
        .iter()
        .filter_map(|k| json.get(*k).map(|v| format!("{}: {}", k, v)))
        .collect();
    if parts.is_empty() {
        json.to_string()
    } else {
        parts.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> LookupService {
        let config = LookupConfig {
            weather_url: None,
            timeout_secs: 1,
            stores: vec![
                StoreRecord {
                    id: "VM_DL_001".to_string(),
                    name: "Connaught Place".to_string(),
                    city: "Delhi".to_string(),
                    region: Some("North".to_string()),
                    manager: None,
                },
                StoreRecord {
                    id: "VM_MH_002".to_string(),
                    name: "Andheri".to_string(),
                    city: "Mumbai".to_string(),
                    region: None,
                    manager: None,
                },
            ],
            competitors: vec![CompetitorRecord {
                name: "MegaMart".to_string(),
                city: "Delhi".to_string(),
                note: Some("weekend discounts".to_string()),
            }],
        };
        LookupService::new(&config).unwrap()
    }

    #[test]
    fn stores_match_by_id_and_city() {
        let svc = service();
        let by_id = svc.stores_for("How did VM_DL_001 do?");
        assert_eq!(by_id.len(), 1);
        assert_eq!(by_id[0].city, "Delhi");

        let by_city = svc.stores_for("sales in mumbai last week");
        assert_eq!(by_city.len(), 1);
        assert_eq!(by_city[0].id, "VM_MH_002");
    }

    #[tokio::test]
    async fn missing_weather_service_yields_placeholder() {
        let svc = service();
        let report = svc.weather("Delhi").await;
        assert!(report.placeholder);
        assert!(report.text.contains("PLACEHOLDER"));
    }

    #[tokio::test]
    async fn lookup_labels_every_block() {
        let svc = service();
        let blocks = svc.lookup("Compare VM_DL_001 with competitors").await;
        let labels: Vec<&str> = blocks.iter().map(|b| b.label.as_str()).collect();
        assert_eq!(
            labels,
            vec!["store directory", "weather: Delhi (placeholder)", "competitors"]
        );
        assert!(blocks.iter().all(|b| b.source == ContextSource::ExternalApi));
        assert!(blocks[2].text.contains("MegaMart"));
    }

    #[tokio::test]
    async fn unrelated_question_has_no_lookups() {
        let svc = service();
        assert!(svc.lookup("what is the return policy").await.is_empty());
    }
}
