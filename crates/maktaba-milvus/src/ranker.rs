//! Fusion strategies for hybrid search.

use maktaba::{Error, Result};
use serde_json::{json, Value};

/// How the two ANN result lists are fused into one ranking.
#[derive(Debug, Clone, PartialEq)]
pub enum Ranker {
    /// Reciprocal Rank Fusion: `score = Σ 1 / (k + rank_i)`.
    Rrf { k: i64 },
    /// Linear combination of the dense and sparse scores.
    Weighted { dense: f64, sparse: f64 },
}

impl Ranker {
    /// Build a ranker from the wire form `(name, params)`, validating
    /// the parameter shape before anything touches the network.
    pub fn from_request(name: &str, params: &[Value]) -> Result<Self> {
        match name {
            "RRF" => {
                let k = match params {
                    [value] => value.as_i64(),
                    _ => None,
                };
                match k {
                    Some(k) if k > 0 && k <= 16384 => Ok(Ranker::Rrf { k }),
                    _ => Err(Error::validation(
                        "RRF requires a single integer parameter in the range (0, 16384]",
                    )),
                }
            }
            "Weighted" => {
                let weights = match params {
                    [dense, sparse] => dense.as_f64().zip(sparse.as_f64()),
                    _ => None,
                };
                match weights {
                    Some((dense, sparse))
                        if (0.0..=1.0).contains(&dense) && (0.0..=1.0).contains(&sparse) =>
                    {
                        Ok(Ranker::Weighted { dense, sparse })
                    }
                    _ => Err(Error::validation(
                        "Weighted requires two float parameters in the range [0, 1]",
                    )),
                }
            }
            other => Err(Error::validation(format!(
                "The reranker must be either 'RRF' or 'Weighted', got '{other}'"
            ))),
        }
    }

    /// The `rerank` clause of an advanced-search request.
    #[must_use]
    pub fn to_rerank_clause(&self) -> Value {
        match self {
            Ranker::Rrf { k } => json!({
                "strategy": "rrf",
                "params": { "k": k }
            }),
            Ranker::Weighted { dense, sparse } => json!({
                "strategy": "weighted",
                "params": { "weights": [dense, sparse] }
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rrf_accepts_range() {
        assert_eq!(
            Ranker::from_request("RRF", &[json!(60)]).unwrap(),
            Ranker::Rrf { k: 60 }
        );
        assert_eq!(
            Ranker::from_request("RRF", &[json!(16384)]).unwrap(),
            Ranker::Rrf { k: 16384 }
        );
    }

    #[test]
    fn test_rrf_rejects_bad_params() {
        assert!(Ranker::from_request("RRF", &[json!(0)]).is_err());
        assert!(Ranker::from_request("RRF", &[json!(16385)]).is_err());
        assert!(Ranker::from_request("RRF", &[json!(0.5), json!(0.5)]).is_err());
        assert!(Ranker::from_request("RRF", &[]).is_err());
    }

    #[test]
    fn test_weighted_accepts_unit_interval() {
        assert_eq!(
            Ranker::from_request("Weighted", &[json!(0.5), json!(0.5)]).unwrap(),
            Ranker::Weighted { dense: 0.5, sparse: 0.5 }
        );
        // Integers coerce to floats on the wire.
        assert_eq!(
            Ranker::from_request("Weighted", &[json!(1), json!(0)]).unwrap(),
            Ranker::Weighted { dense: 1.0, sparse: 0.0 }
        );
    }

    #[test]
    fn test_weighted_rejects_bad_params() {
        assert!(Ranker::from_request("Weighted", &[json!(1.5), json!(0.5)]).is_err());
        assert!(Ranker::from_request("Weighted", &[json!(-0.1), json!(0.5)]).is_err());
        assert!(Ranker::from_request("Weighted", &[json!(0.5)]).is_err());
    }

    #[test]
    fn test_unknown_ranker_rejected() {
        let err = Ranker::from_request("Cosine", &[]).unwrap_err();
        assert!(err.to_string().contains("RRF"));
    }

    #[test]
    fn test_rerank_clauses() {
        let rrf = Ranker::Rrf { k: 60 }.to_rerank_clause();
        assert_eq!(rrf["strategy"], "rrf");
        assert_eq!(rrf["params"]["k"], 60);

        let weighted = Ranker::Weighted { dense: 0.7, sparse: 0.3 }.to_rerank_clause();
        assert_eq!(weighted["strategy"], "weighted");
        assert_eq!(weighted["params"]["weights"][0], 0.7);
    }
}
