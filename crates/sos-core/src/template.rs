//! Result template registration and lookup.
//!
//! Templates are append-only: registration never overwrites and there is no
//! update or delete. At most one template exists per (offering,
//! observedProperty) pair.

use crate::constellation::{ConstellationValidator, Transition};
use crate::model::{
    ConstellationKey, EncodingRule, FeatureDescriptor, FeatureRef, ObservationType,
    ResultSchema, ResultTemplate,
};
use crate::store::{ConstellationStore, FeatureResolver, ProcedureRegistry, StoreError, TemplateStore};
use sos_common::{Error, Result, TemplateId};
use tracing::info;

/// A validated registration request.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateRegistration {
    /// Caller-chosen identifier; generated when absent.
    pub identifier: Option<TemplateId>,
    pub key: ConstellationKey,
    pub observation_type: ObservationType,
    pub schema: ResultSchema,
    pub encoding: EncodingRule,
    pub feature: FeatureDescriptor,
}

impl TemplateRegistration {
    /// Checks that need no storage access.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("offering", &self.key.offering),
            ("observedProperty", &self.key.observed_property),
            ("procedure", &self.key.procedure),
            ("featureOfInterest", &self.feature.identifier),
        ] {
            if value.trim().is_empty() {
                return Err(Error::MissingParameter(name.to_string()));
            }
        }
        if !self.observation_type.is_concrete() {
            return Err(Error::invalid(
                "observationType",
                "a concrete observation type is required",
            ));
        }
        self.schema.validate()?;
        self.encoding.validate()
    }
}

/// Outcome of a successful registration.
#[derive(Debug, Clone, PartialEq)]
pub struct Registered {
    pub template: ResultTemplate,
    pub transition: Transition,
    pub related_links: usize,
}

#[derive(Debug, Clone, Default)]
pub struct TemplateRegistry {
    validator: ConstellationValidator,
}

impl TemplateRegistry {
    pub fn new(validator: ConstellationValidator) -> Self {
        TemplateRegistry { validator }
    }

    /// Register a template inside the caller's transaction.
    pub fn register<S>(&self, session: &mut S, request: &TemplateRegistration) -> Result<Registered>
    where
        S: ConstellationStore + ProcedureRegistry + FeatureResolver + TemplateStore + ?Sized,
    {
        let identifier = match &request.identifier {
            Some(id) => {
                if session.template_by_id(id.as_str())?.is_some() {
                    return Err(Error::DuplicateTemplateIdentifier(id.to_string()));
                }
                id.clone()
            }
            None => TemplateId::generate(),
        };
        let key = &request.key;
        // Type conflicts take precedence over the duplicate-pair check.
        let resolution = self
            .validator
            .resolve_or_create(session, key, request.observation_type)?;
        if let Some(existing) = session.template_for(&key.offering, &key.observed_property)? {
            return Err(duplicate(key, &existing.identifier));
        }
        let feature_id = session.resolve_feature(&request.feature)?;
        let related_links =
            self.validator
                .propagate_related_features(session, &key.offering, feature_id)?;

        let template = ResultTemplate {
            identifier,
            result_structure: request.schema.clone(),
            result_encoding: request.encoding.clone(),
            constellation: resolution.constellation,
            feature_of_interest: FeatureRef {
                id: feature_id,
                identifier: request.feature.identifier.clone(),
            },
        };
        match session.insert_template(&template) {
            Ok(()) => {}
            // Lost a race with another procedure registering the same pair.
            Err(StoreError::Constraint(_)) => {
                return Err(match session.template_for(&key.offering, &key.observed_property)? {
                    Some(existing) => duplicate(key, &existing.identifier),
                    None => Error::DuplicateTemplateIdentifier(template.identifier.to_string()),
                })
            }
            Err(e) => return Err(e.into()),
        }

        info!(
            template = %template.identifier,
            %key,
            observation_type = %template.constellation.observation_type,
            "result template registered"
        );
        Ok(Registered {
            template,
            transition: resolution.transition,
            related_links,
        })
    }

    pub fn lookup<S>(&self, session: &mut S, identifier: &str) -> Result<ResultTemplate>
    where
        S: TemplateStore + ?Sized,
    {
        session
            .template_by_id(identifier)?
            .ok_or_else(|| Error::TemplateNotFound(identifier.to_string()))
    }

    pub fn lookup_by_pair<S>(
        &self,
        session: &mut S,
        offering: &str,
        observed_property: &str,
    ) -> Result<ResultTemplate>
    where
        S: TemplateStore + ?Sized,
    {
        session
            .template_for(offering, observed_property)?
            .ok_or_else(|| {
                Error::TemplateNotFound(format!(
                    "offering={}, observedProperty={}",
                    offering, observed_property
                ))
            })
    }

    pub fn list<S>(&self, session: &mut S) -> Result<Vec<ResultTemplate>>
    where
        S: TemplateStore + ?Sized,
    {
        Ok(session.list_templates()?)
    }
}

fn duplicate(key: &ConstellationKey, existing: &TemplateId) -> Error {
    Error::DuplicateTemplate {
        offering: key.offering.clone(),
        observed_property: key.observed_property.clone(),
        existing: existing.to_string(),
    }
}
