//! Ensemble blender
//!
//! Combines the per-method forecasts into one forecast. For every target time
//! and field, each contributing method is weighted by its configured base
//! weight times its historical accuracy for that field; weights are
//! renormalized over the methods actually present. Disagreement between
//! methods lowers the blended confidence.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use shared::{
    EnsembleForecast, FieldBlend, ForecastField, ForecastMethod, ForecastPoint, ForecastProducer,
    MethodForecast, MethodWeight,
};
use uuid::Uuid;

use crate::config::EnsembleConfig;
use crate::error::{AppError, AppResult};
use crate::services::accuracy::AccuracyWeights;

/// Weighted blender over the closed set of forecast methods
#[derive(Debug, Clone)]
pub struct EnsembleBlender {
    config: EnsembleConfig,
    horizon: usize,
}

/// One method's value for a field at a target
struct Contribution {
    method: ForecastMethod,
    value: f64,
    confidence: f64,
    condition: Option<String>,
}

impl EnsembleBlender {
    pub fn new(config: EnsembleConfig, horizon: usize) -> Self {
        Self { config, horizon }
    }

    /// Blend the given method forecasts; ensemble inputs are ignored
    pub fn blend(
        &self,
        forecasts: &[MethodForecast],
        weights: &AccuracyWeights,
        generated_at: DateTime<Utc>,
    ) -> AppResult<EnsembleForecast> {
        let inputs: Vec<(ForecastMethod, Vec<ForecastPoint>)> = forecasts
            .iter()
            .filter(|f| f.method() != ForecastMethod::Ensemble)
            .map(|f| (f.method(), f.produce(self.horizon)))
            .filter(|(_, points)| !points.is_empty())
            .collect();

        if inputs.is_empty() {
            return Err(AppError::NoForecastMethods);
        }

        let targets: BTreeSet<DateTime<Utc>> = inputs
            .iter()
            .flat_map(|(_, points)| points.iter().map(|p| p.target))
            .collect();

        let mut points = Vec::new();
        let mut field_blends = Vec::new();
        let mut contributing: BTreeSet<ForecastMethod> = BTreeSet::new();

        for target in targets.into_iter().take(self.horizon) {
            let at_target: Vec<&ForecastPoint> = inputs
                .iter()
                .filter_map(|(_, points)| points.iter().find(|p| p.target == target))
                .collect();

            let mut point = ForecastPoint::new(ForecastMethod::Ensemble, target, generated_at);
            let mut label_weights: Vec<(f64, Option<String>)> = Vec::new();

            for field in ForecastField::ALL {
                let contributions: Vec<Contribution> = at_target
                    .iter()
                    .filter_map(|p| {
                        let value = p.value(field).filter(|v| v.is_finite())?;
                        Some(Contribution {
                            method: p.method,
                            value,
                            confidence: p.confidence(field).unwrap_or(0.0),
                            condition: p.condition.clone(),
                        })
                    })
                    .collect();
                if contributions.is_empty() {
                    continue;
                }

                let blend = self.blend_field(target, field, &contributions, weights);
                point.set(field, blend.value, blend.confidence);
                contributing.extend(blend.record.weights.iter().map(|w| w.method));

                if field == ForecastField::PrecipitationProbability {
                    label_weights = contributions
                        .iter()
                        .zip(&blend.record.weights)
                        .map(|(c, w)| (w.weight, c.condition.clone()))
                        .collect();
                }
                field_blends.push(blend.record);
            }

            if point.fields().next().is_none() {
                continue;
            }
            point.condition = self.pick_condition(&label_weights, &at_target);
            points.push(point);
        }

        if points.is_empty() {
            return Err(AppError::NoForecastMethods);
        }

        let contributing_methods: Vec<ForecastMethod> = contributing.into_iter().collect();
        let missing_methods: Vec<ForecastMethod> = ForecastMethod::BLEND_INPUTS
            .into_iter()
            .filter(|m| !contributing_methods.contains(m))
            .collect();
        if !missing_methods.is_empty() {
            tracing::warn!(
                missing = ?missing_methods,
                contributing = ?contributing_methods,
                "Blending with a reduced method set"
            );
        }

        let method_weights = average_weights(&field_blends, &contributing_methods);
        let confidences: Vec<f64> = points
            .iter()
            .flat_map(|p| p.confidence.values().copied())
            .collect();
        let overall_confidence = if confidences.is_empty() {
            0.0
        } else {
            confidences.iter().sum::<f64>() / confidences.len() as f64
        };

        let sources: BTreeSet<String> = forecasts
            .iter()
            .filter(|f| contributing_methods.contains(&f.method))
            .flat_map(|f| f.sources.iter().cloned())
            .collect();
        let assessment = forecasts
            .iter()
            .filter(|f| f.method == ForecastMethod::ReasoningBased)
            .find_map(|f| f.assessment.clone());

        tracing::debug!(
            points = points.len(),
            overall_confidence,
            weights = ?method_weights,
            "Ensemble blended"
        );

        Ok(EnsembleForecast {
            id: Uuid::new_v4(),
            generated_at,
            points,
            method_weights,
            overall_confidence,
            contributing_methods,
            missing_methods,
            sources: sources.into_iter().collect(),
            field_blends,
            assessment,
        })
    }

    fn blend_field(
        &self,
        target: DateTime<Utc>,
        field: ForecastField,
        contributions: &[Contribution],
        weights: &AccuracyWeights,
    ) -> BlendedField {
        let normalized = self.normalized_weights(field, contributions, weights);

        if let [single] = contributions {
            return BlendedField {
                value: single.value,
                confidence: single.confidence,
                record: FieldBlend {
                    target,
                    field,
                    weights: vec![MethodWeight {
                        method: single.method,
                        weight: 1.0,
                    }],
                    blended: false,
                    spread: 0.0,
                },
            };
        }

        let value: f64 = contributions
            .iter()
            .zip(&normalized)
            .map(|(c, w)| c.value * w)
            .sum();
        let confidence: f64 = contributions
            .iter()
            .zip(&normalized)
            .map(|(c, w)| c.confidence * w)
            .sum();

        let max = contributions.iter().map(|c| c.value).fold(f64::MIN, f64::max);
        let min = contributions.iter().map(|c| c.value).fold(f64::MAX, f64::min);
        let spread = max - min;

        BlendedField {
            value,
            confidence: (confidence * self.disagreement_factor(field, spread)).clamp(0.0, 1.0),
            record: FieldBlend {
                target,
                field,
                weights: contributions
                    .iter()
                    .zip(normalized)
                    .map(|(c, weight)| MethodWeight {
                        method: c.method,
                        weight,
                    })
                    .collect(),
                blended: true,
                spread,
            },
        }
    }

    /// Base weight times accuracy, renormalized over the contributors
    fn normalized_weights(
        &self,
        field: ForecastField,
        contributions: &[Contribution],
        weights: &AccuracyWeights,
    ) -> Vec<f64> {
        let raw: Vec<f64> = contributions
            .iter()
            .map(|c| self.config.base_weight(c.method) * weights.score(c.method, field))
            .collect();
        if let Some(normalized) = normalize(&raw) {
            return normalized;
        }

        // Every method scored zero; fall back to the base weights alone
        let base: Vec<f64> = contributions
            .iter()
            .map(|c| self.config.base_weight(c.method))
            .collect();
        normalize(&base).unwrap_or_else(|| vec![1.0 / contributions.len() as f64; contributions.len()])
    }

    /// 1.0 while the spread is within the field's limit, shrinking beyond it
    fn disagreement_factor(&self, field: ForecastField, spread: f64) -> f64 {
        let limit = self.config.spread_limit(field);
        if spread <= limit || spread <= 0.0 {
            return 1.0;
        }
        let floor = self.config.min_disagreement_factor.clamp(0.0, 1.0);
        (limit / spread).clamp(floor, 1.0)
    }

    /// Label of the heaviest contributor on precipitation probability, else any label
    fn pick_condition(
        &self,
        label_weights: &[(f64, Option<String>)],
        at_target: &[&ForecastPoint],
    ) -> Option<String> {
        label_weights
            .iter()
            .filter(|(_, label)| label.is_some())
            .max_by(|a, b| a.0.total_cmp(&b.0))
            .and_then(|(_, label)| label.clone())
            .or_else(|| {
                let mut labelled: Vec<&&ForecastPoint> =
                    at_target.iter().filter(|p| p.condition.is_some()).collect();
                labelled.sort_by(|a, b| {
                    self.config
                        .base_weight(b.method)
                        .total_cmp(&self.config.base_weight(a.method))
                });
                labelled.first().and_then(|p| p.condition.clone())
            })
    }
}

struct BlendedField {
    value: f64,
    confidence: f64,
    record: FieldBlend,
}

fn normalize(raw: &[f64]) -> Option<Vec<f64>> {
    let total: f64 = raw.iter().filter(|w| w.is_finite() && **w > 0.0).sum();
    if total <= 0.0 || !total.is_finite() {
        return None;
    }
    Some(
        raw.iter()
            .map(|w| if w.is_finite() && *w > 0.0 { w / total } else { 0.0 })
            .collect(),
    )
}

/// Mean weight of each method across every blended field
fn average_weights(
    blends: &[FieldBlend],
    methods: &[ForecastMethod],
) -> BTreeMap<ForecastMethod, f64> {
    let mut totals: BTreeMap<ForecastMethod, f64> = methods.iter().map(|m| (*m, 0.0)).collect();
    if blends.is_empty() {
        return totals;
    }
    for blend in blends {
        for w in &blend.weights {
            *totals.entry(w.method).or_insert(0.0) += w.weight;
        }
    }
    for total in totals.values_mut() {
        *total /= blends.len() as f64;
    }
    totals
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        let weights = normalize(&[0.2, 0.6]).unwrap();
        assert!((weights[0] - 0.25).abs() < 1e-12);
        assert!((weights.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!(normalize(&[0.0, 0.0]).is_none());
        assert_eq!(normalize(&[f64::NAN, 1.0]).unwrap(), vec![0.0, 1.0]);
    }

    #[test]
    fn test_disagreement_factor() {
        let blender = EnsembleBlender::new(EnsembleConfig::default(), 6);
        assert_eq!(blender.disagreement_factor(ForecastField::Temperature, 2.0), 1.0);
        assert!((blender.disagreement_factor(ForecastField::Temperature, 6.0) - 0.5).abs() < 1e-12);
        assert_eq!(blender.disagreement_factor(ForecastField::Temperature, 100.0), 0.3);
    }
}
