/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/modules/rbac_manager/src/error.rs
*
* Error type shared by every reconciliation step in this crate.
*
* SPDX-License-Identifier: Apache-2.0
*/

use management_api::ClientError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("ClusterRoleTemplateBinding {0} has no subject")]
    MissingSubject(String),

    #[error("ClusterRoleTemplateBinding {0} has an ambiguous subject: {1}")]
    AmbiguousSubject(String, &'static str),

    #[error("cannot create binding because cluster {0} was not found")]
    ClusterNotFound(String),

    #[error("cannot check referenced roles of {0}: maximum inheritance depth exceeded")]
    InheritanceTooDeep(String),

    #[error("{}", join(.0))]
    Aggregate(Vec<Error>),
}

fn join(errors: &[Error]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join("; ")
}

impl Error {
    /// True when the error, or the client error it wraps, is a 404.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Client(e) if e.is_not_found())
    }

    /// Collapses the errors collected over a batch into one result. A single
    /// error is returned as-is rather than wrapped.
    pub fn aggregate(mut errors: Vec<Error>) -> Result<(), Error> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(Error::Aggregate(errors)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregate_joins_messages() {
        assert!(Error::aggregate(vec![]).is_ok());

        let single = Error::aggregate(vec![Error::ClusterNotFound("c-1".into())]).unwrap_err();
        assert_eq!(single.to_string(), "cannot create binding because cluster c-1 was not found");

        let many = Error::aggregate(vec![
            Error::MissingSubject("a".into()),
            Error::ClusterNotFound("c-2".into()),
        ])
        .unwrap_err();
        assert_eq!(
            many.to_string(),
            "ClusterRoleTemplateBinding a has no subject; cannot create binding because cluster c-2 was not found"
        );
    }
}
