use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Total attempts an agent gets to produce schema-valid output for one task.
pub const MAX_SCHEMA_ATTEMPTS: u32 = 3;

/// Expected JSON type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JsonType {
    /// A JSON string.
    String,
    /// Any JSON number.
    Number,
    /// A JSON number without a fractional part.
    Integer,
    /// `true` or `false`.
    Boolean,
    /// A JSON object.
    Object,
    /// A JSON array.
    Array,
}

impl JsonType {
    fn matches(&self, value: &serde_json::Value) -> bool {
        match self {
            JsonType::String => value.is_string(),
            JsonType::Number => value.is_number(),
            JsonType::Integer => value.is_i64() || value.is_u64(),
            JsonType::Boolean => value.is_boolean(),
            JsonType::Object => value.is_object(),
            JsonType::Array => value.is_array(),
        }
    }
}

/// Inclusive numeric bounds on a field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeRule {
    /// Dotted path of the field.
    pub field: String,
    /// Lowest allowed value.
    #[serde(default)]
    pub min: Option<f64>,
    /// Highest allowed value.
    #[serde(default)]
    pub max: Option<f64>,
}

/// A business rule that adds risk when a numeric field exceeds a threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskRule {
    /// Shown in draft reviews when the rule fires.
    pub name: String,
    /// Dotted path of the numeric field.
    pub field: String,
    /// The rule fires when the value is strictly above this.
    pub threshold: f64,
    /// Risk added when it fires.
    pub weight: u32,
}

/// Everything output governance knows about one agent's results.
///
/// Fields are addressed with dotted paths (`quote.total`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputContract {
    /// Agent whose results the contract governs.
    pub agent: String,
    /// Fields that must be present and non-null.
    #[serde(default)]
    pub required: Vec<String>,
    /// Expected type per field.
    #[serde(default)]
    pub types: HashMap<String, JsonType>,
    /// Numeric bounds.
    #[serde(default)]
    pub ranges: Vec<RangeRule>,
    /// Business rules adding risk.
    #[serde(default)]
    pub rules: Vec<RiskRule>,
    /// Risk every result of this agent starts from.
    #[serde(default)]
    pub base_risk: u32,
}

impl OutputContract {
    /// An empty contract for `agent`.
    pub fn new(agent: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            ..Default::default()
        }
    }

    /// Require `field`.
    pub fn require(mut self, field: impl Into<String>) -> Self {
        self.required.push(field.into());
        self
    }

    /// Expect `field` to have type `ty`.
    pub fn typed(mut self, field: impl Into<String>, ty: JsonType) -> Self {
        self.types.insert(field.into(), ty);
        self
    }

    /// Bound `field` to `min..=max`.
    pub fn range(mut self, field: impl Into<String>, min: Option<f64>, max: Option<f64>) -> Self {
        self.ranges.push(RangeRule {
            field: field.into(),
            min,
            max,
        });
        self
    }

    /// Add `weight` risk when `field` exceeds `threshold`.
    pub fn rule(mut self, name: impl Into<String>, field: impl Into<String>, threshold: f64, weight: u32) -> Self {
        self.rules.push(RiskRule {
            name: name.into(),
            field: field.into(),
            threshold,
            weight,
        });
        self
    }
}

fn lookup<'a>(output: &'a serde_json::Value, field: &str) -> Option<&'a serde_json::Value> {
    if field.is_empty() {
        return Some(output);
    }
    output.pointer(&format!("/{}", field.replace('.', "/")))
}

/// Structural violations of `contract` in `output`, empty when the output is valid.
pub fn check_schema(contract: &OutputContract, output: &serde_json::Value) -> Vec<String> {
    let mut violations = Vec::new();

    for field in &contract.required {
        match lookup(output, field) {
            None | Some(serde_json::Value::Null) => {
                violations.push(format!("missing required field '{field}'"));
            }
            Some(_) => {}
        }
    }

    let mut typed: Vec<(&String, &JsonType)> = contract.types.iter().collect();
    typed.sort_by_key(|(field, _)| field.as_str());
    for (field, ty) in typed {
        if let Some(value) = lookup(output, field) {
            if !value.is_null() && !ty.matches(value) {
                violations.push(format!("field '{field}' should be {ty:?}, got {value}"));
            }
        }
    }

    for range in &contract.ranges {
        let Some(value) = lookup(output, &range.field) else {
            continue;
        };
        let Some(n) = value.as_f64() else {
            violations.push(format!("field '{}' should be numeric, got {value}", range.field));
            continue;
        };
        if range.min.is_some_and(|min| n < min) || range.max.is_some_and(|max| n > max) {
            violations.push(format!(
                "field '{}' = {n} is outside [{}, {}]",
                range.field,
                range.min.map_or("-inf".to_string(), |v| v.to_string()),
                range.max.map_or("+inf".to_string(), |v| v.to_string()),
            ));
        }
    }

    violations
}

/// A business rule that fired on a result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FiredRule {
    /// Name of the rule.
    pub name: String,
    /// Field it looked at.
    pub field: String,
    /// Value found there.
    pub value: f64,
    /// The threshold it exceeded.
    pub threshold: f64,
    /// Risk it added.
    pub weight: u32,
}

/// Adjusted risk of a result: contract base risk plus the weight of every fired
/// rule, capped at 100.
pub fn check_rules(contract: &OutputContract, output: &serde_json::Value) -> (u32, Vec<FiredRule>) {
    let mut score = contract.base_risk;
    let mut fired = Vec::new();
    for rule in &contract.rules {
        let Some(value) = lookup(output, &rule.field).and_then(serde_json::Value::as_f64) else {
            continue;
        };
        if value > rule.threshold {
            score = score.saturating_add(rule.weight);
            fired.push(FiredRule {
                name: rule.name.clone(),
                field: rule.field.clone(),
                value,
                threshold: rule.threshold,
                weight: rule.weight,
            });
        }
    }
    (score.min(100), fired)
}

/// What output governance decided about one result.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputVerdict {
    /// The result passed. Its score stayed under the threshold.
    Accept {
        /// Adjusted risk of the result.
        score: u32,
    },
    /// The result broke its contract's schema.
    SchemaFailure {
        /// One message per broken requirement.
        violations: Vec<String>,
        /// 1-based attempt that just failed.
        attempt: u32,
        /// Another attempt is allowed.
        retry: bool,
    },
    /// Business rules pushed the score to the threshold or past it.
    RiskExceeded {
        /// Adjusted risk of the result.
        score: u32,
        /// Rules that contributed.
        fired: Vec<FiredRule>,
    },
}

/// Contracts for every governed agent plus the output risk threshold.
#[derive(Debug, Clone)]
pub struct OutputPolicy {
    contracts: HashMap<String, OutputContract>,
    /// Scores at or above this go to draft review.
    pub threshold: u32,
    /// Schema attempts per agent per task, at least one.
    pub max_schema_attempts: u32,
}

impl OutputPolicy {
    /// A policy with no contracts.
    pub fn new(threshold: u32) -> Self {
        Self {
            contracts: HashMap::new(),
            threshold,
            max_schema_attempts: MAX_SCHEMA_ATTEMPTS,
        }
    }

    /// Govern `contract.agent` by `contract`, replacing any earlier one.
    pub fn with_contract(mut self, contract: OutputContract) -> Self {
        self.contracts.insert(contract.agent.clone(), contract);
        self
    }

    /// Set the schema attempt budget. Zero is raised to one.
    pub fn with_max_schema_attempts(mut self, attempts: u32) -> Self {
        self.max_schema_attempts = attempts.max(1);
        self
    }

    /// The contract for `agent`, if any.
    pub fn contract(&self, agent: &str) -> Option<&OutputContract> {
        self.contracts.get(agent)
    }

    /// Judge one result of `agent`.
    ///
    /// `prior_failures` is how many earlier attempts for the same task already
    /// failed the schema check. The schema check runs first; the rule check only
    /// runs on structurally valid output. A result is accepted when its adjusted
    /// risk is strictly below the threshold. Agents without a contract are accepted
    /// at zero risk.
    pub fn evaluate(&self, agent: &str, output: &serde_json::Value, prior_failures: u32) -> OutputVerdict {
        let Some(contract) = self.contracts.get(agent) else {
            return OutputVerdict::Accept { score: 0 };
        };

        let violations = check_schema(contract, output);
        if !violations.is_empty() {
            let attempt = prior_failures + 1;
            return OutputVerdict::SchemaFailure {
                violations,
                attempt,
                retry: attempt < self.max_schema_attempts,
            };
        }

        let (score, fired) = check_rules(contract, output);
        if score < self.threshold {
            OutputVerdict::Accept { score }
        } else {
            OutputVerdict::RiskExceeded { score, fired }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn quote_contract() -> OutputContract {
        OutputContract::new("pricing")
            .require("quote.total")
            .require("currency")
            .typed("currency", JsonType::String)
            .range("discount", Some(0.0), Some(100.0))
            .rule("large_commitment", "quote.total", 10_000.0, 40)
            .rule("deep_discount", "discount", 30.0, 20)
    }

    #[test]
    fn test_valid_output_passes_schema() {
        let output = json!({"quote": {"total": 500}, "currency": "EUR", "discount": 5});
        assert!(check_schema(&quote_contract(), &output).is_empty());
    }

    #[test]
    fn test_schema_violations_are_listed() {
        let output = json!({"currency": 42, "discount": 140});
        let violations = check_schema(&quote_contract(), &output);
        assert_eq!(violations.len(), 3);
        assert!(violations[0].contains("quote.total"));
        assert!(violations.iter().any(|v| v.contains("should be String")));
        assert!(violations.iter().any(|v| v.contains("outside")));
    }

    #[test]
    fn test_null_counts_as_missing() {
        let contract = OutputContract::new("x").require("a");
        assert_eq!(check_schema(&contract, &json!({"a": null})).len(), 1);
    }

    #[test]
    fn test_rules_add_weight() {
        let output = json!({"quote": {"total": 25_000}, "currency": "EUR", "discount": 35});
        let (score, fired) = check_rules(&quote_contract(), &output);
        assert_eq!(score, 60);
        assert_eq!(fired.len(), 2);
        assert_eq!(fired[0].name, "large_commitment");
    }

    #[test]
    fn test_schema_retry_bound() {
        let policy = OutputPolicy::new(50).with_contract(quote_contract());
        let bad = json!({"currency": "EUR"});
        for (prior, expect_retry) in [(0, true), (1, true), (2, false)] {
            match policy.evaluate("pricing", &bad, prior) {
                OutputVerdict::SchemaFailure { attempt, retry, .. } => {
                    assert_eq!(attempt, prior + 1);
                    assert_eq!(retry, expect_retry);
                }
                other => panic!("Expected schema failure, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_risk_threshold_routes_to_review() {
        let policy = OutputPolicy::new(50).with_contract(quote_contract());
        let small = json!({"quote": {"total": 100}, "currency": "EUR"});
        let big = json!({"quote": {"total": 50_000}, "currency": "EUR", "discount": 40});
        assert_eq!(
            policy.evaluate("pricing", &small, 0),
            OutputVerdict::Accept { score: 0 }
        );
        assert!(matches!(
            policy.evaluate("pricing", &big, 0),
            OutputVerdict::RiskExceeded { score: 60, .. }
        ));
    }

    #[test]
    fn test_score_equal_to_threshold_is_flagged() {
        let contract = OutputContract::new("a").rule("r", "n", 0.0, 50);
        let policy = OutputPolicy::new(50).with_contract(contract);
        assert!(matches!(
            policy.evaluate("a", &json!({"n": 1}), 0),
            OutputVerdict::RiskExceeded { .. }
        ));
    }

    #[test]
    fn test_ungoverned_agent_is_accepted() {
        let policy = OutputPolicy::new(50);
        assert_eq!(
            policy.evaluate("anyone", &json!("free text"), 0),
            OutputVerdict::Accept { score: 0 }
        );
    }

    #[test]
    fn test_contract_from_toml() {
        let contract: OutputContract = toml::from_str(
            r#"
            agent = "pricing"
            required = ["total"]
            base_risk = 10

            [types]
            total = "number"

            [[rules]]
            name = "big"
            field = "total"
            threshold = 1000.0
            weight = 45
            "#,
        )
        .unwrap();
        assert_eq!(contract.types["total"], JsonType::Number);
        let (score, _) = check_rules(&contract, &json!({"total": 5000}));
        assert_eq!(score, 55);
    }
}
