//! Immutable experiment dimensions and domains.

use serde::{Deserialize, Serialize};
use sva_core::{Domain, ErrorInfo, SvaError};

/// Dimensions and domains of an experiment.
///
/// `valid_domain` bounds the inputs the truth function accepts and
/// `experimental_domain` bounds where the loop searches for new points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "PropertiesRecord")]
pub struct ExperimentProperties {
    n_input_dim: usize,
    n_output_dim: usize,
    valid_domain: Option<Domain>,
    experimental_domain: Domain,
}

#[derive(Deserialize)]
struct PropertiesRecord {
    n_input_dim: usize,
    n_output_dim: usize,
    valid_domain: Option<Domain>,
    experimental_domain: Domain,
}

impl TryFrom<PropertiesRecord> for ExperimentProperties {
    type Error = SvaError;

    fn try_from(record: PropertiesRecord) -> Result<Self, Self::Error> {
        Self::new(
            record.n_input_dim,
            record.n_output_dim,
            record.valid_domain,
            record.experimental_domain,
        )
    }
}

impl ExperimentProperties {
    /// Validates and builds the properties.
    pub fn new(
        n_input_dim: usize,
        n_output_dim: usize,
        valid_domain: Option<Domain>,
        experimental_domain: Domain,
    ) -> Result<Self, SvaError> {
        if n_input_dim == 0 || n_output_dim == 0 {
            return Err(SvaError::Config(
                ErrorInfo::new("zero-dimension", "input and output dimensions must be positive")
                    .with_context("n_input_dim", n_input_dim)
                    .with_context("n_output_dim", n_output_dim),
            ));
        }
        for (name, domain) in [
            ("valid_domain", valid_domain.as_ref()),
            ("experimental_domain", Some(&experimental_domain)),
        ] {
            if let Some(domain) = domain {
                if domain.dim() != n_input_dim {
                    return Err(SvaError::Config(
                        ErrorInfo::new("domain-width", "domain must have one column per input")
                            .with_context("domain", name)
                            .with_context("columns", domain.dim())
                            .with_context("n_input_dim", n_input_dim),
                    ));
                }
            }
        }
        Ok(Self {
            n_input_dim,
            n_output_dim,
            valid_domain,
            experimental_domain,
        })
    }

    /// Number of input dimensions, excluding any modality column.
    pub fn n_input_dim(&self) -> usize {
        self.n_input_dim
    }

    /// Number of output columns.
    pub fn n_output_dim(&self) -> usize {
        self.n_output_dim
    }

    /// Bounds enforced on truth inputs, if declared.
    pub fn valid_domain(&self) -> Option<&Domain> {
        self.valid_domain.as_ref()
    }

    /// Bounds searched by sampling and acquisition.
    pub fn experimental_domain(&self) -> &Domain {
        &self.experimental_domain
    }

    /// Plot extent `[x0, x1, y0, y1]` of a two-dimensional experimental domain.
    pub fn experimental_domain_extent(&self) -> Result<[f64; 4], SvaError> {
        if self.n_input_dim != 2 {
            return Err(SvaError::Config(
                ErrorInfo::new("extent-dimension", "only implemented for 2d inputs")
                    .with_context("n_input_dim", self.n_input_dim),
            ));
        }
        let domain = &self.experimental_domain;
        Ok([
            domain.lower()[0],
            domain.upper()[0],
            domain.lower()[1],
            domain.upper()[1],
        ])
    }
}
