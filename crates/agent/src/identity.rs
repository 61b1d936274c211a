//! Cascading identity resolution: exact external id, exact normalized
//! email/phone, fuzzy display name, then customer creation as the floor.

use std::sync::Arc;

use tracing::{debug, info};

use parley_core::domain::customer::Customer;
use parley_core::errors::ProcessingError;
use parley_core::identity::{
    name_similarity, normalize_email, normalize_phone, IdentityHints, MatchMethod,
    FUZZY_NAME_THRESHOLD, FUZZY_SUGGESTION_LIMIT,
};
use parley_db::repositories::{CustomerRepository, RepositoryError};

#[derive(Clone, Debug)]
pub struct Resolution {
    pub customer: Customer,
    pub confidence: f64,
    pub match_method: MatchMethod,
    /// Runner-up fuzzy candidates, best first. Empty for exact matches.
    pub suggestions: Vec<Customer>,
}

pub struct IdentityResolver {
    customers: Arc<dyn CustomerRepository>,
    default_country_prefix: String,
}

fn persistence(err: RepositoryError) -> ProcessingError {
    ProcessingError::Persistence(err.to_string())
}

impl IdentityResolver {
    pub fn new(
        customers: Arc<dyn CustomerRepository>,
        default_country_prefix: impl Into<String>,
    ) -> Self {
        Self { customers, default_country_prefix: default_country_prefix.into() }
    }

    /// Resolve hints to a customer, first cascade hit wins. Idempotent: a
    /// second identical call lands on the customer the first one created.
    pub async fn resolve(&self, hints: &IdentityHints) -> Result<Resolution, ProcessingError> {
        let email = hints.email.as_deref().map(normalize_email).filter(|e| !e.is_empty());
        let phone = hints
            .phone
            .as_deref()
            .map(|raw| normalize_phone(raw, &self.default_country_prefix))
            .filter(|p| !p.is_empty());

        if let Some(external_id) = hints.external_id.as_deref() {
            if let Some(customer) =
                self.customers.find_by_external_id(external_id).await.map_err(persistence)?
            {
                debug!(
                    event_name = "identity_resolved",
                    method = "external_id",
                    customer_id = %customer.id.0,
                    "resolved by external id"
                );
                return Ok(exact(customer, 1.0, MatchMethod::ExternalId));
            }
        }

        if let Some(email) = &email {
            if let Some(mut customer) =
                self.customers.find_by_email(email).await.map_err(persistence)?
            {
                // An email hit can reveal the provider-side id.
                if customer.external_id.is_none() && hints.external_id.is_some() {
                    customer.external_id = hints.external_id.clone();
                    self.customers.save(customer.clone()).await.map_err(persistence)?;
                }
                debug!(
                    event_name = "identity_resolved",
                    method = "email",
                    customer_id = %customer.id.0,
                    "resolved by email"
                );
                return Ok(exact(customer, 0.95, MatchMethod::Email));
            }
        }

        if let Some(phone) = &phone {
            if let Some(mut customer) =
                self.customers.find_by_phone(phone).await.map_err(persistence)?
            {
                let mut dirty = false;
                if customer.email.is_none() && email.is_some() {
                    customer.email = email.clone();
                    dirty = true;
                }
                if customer.name.is_none() && hints.name.is_some() {
                    customer.name = hints.name.clone();
                    dirty = true;
                }
                if dirty {
                    self.customers.save(customer.clone()).await.map_err(persistence)?;
                }
                debug!(
                    event_name = "identity_resolved",
                    method = "phone",
                    customer_id = %customer.id.0,
                    "resolved by phone"
                );
                return Ok(exact(customer, 0.90, MatchMethod::Phone));
            }
        }

        if let Some(name) = hints.name.as_deref() {
            if let Some(resolution) = self.resolve_fuzzy(name).await? {
                return Ok(resolution);
            }
        }

        let created = Customer::new_unmatched(
            hints.external_id.clone(),
            email,
            phone,
            hints.name.clone(),
        );
        self.customers.save(created.clone()).await.map_err(persistence)?;
        info!(
            event_name = "customer_created",
            customer_id = %created.id.0,
            "no identity match, new customer created"
        );
        Ok(exact(created, 1.0, MatchMethod::NewCustomer))
    }

    async fn resolve_fuzzy(&self, name: &str) -> Result<Option<Resolution>, ProcessingError> {
        let named = self.customers.list_named().await.map_err(persistence)?;
        let mut scored: Vec<(f64, Customer)> = named
            .into_iter()
            .filter_map(|customer| {
                let candidate = customer.name.as_deref()?;
                let similarity = name_similarity(name, candidate);
                (similarity > FUZZY_NAME_THRESHOLD).then_some((similarity, customer))
            })
            .collect();
        if scored.is_empty() {
            return Ok(None);
        }
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        let (confidence, best) = scored.remove(0);
        let suggestions: Vec<Customer> = scored
            .into_iter()
            .take(FUZZY_SUGGESTION_LIMIT)
            .map(|(_, customer)| customer)
            .collect();
        debug!(
            event_name = "identity_resolved",
            method = "fuzzy_name",
            customer_id = %best.id.0,
            confidence,
            suggestions = suggestions.len(),
            "resolved by fuzzy name"
        );
        Ok(Some(Resolution {
            customer: best,
            confidence,
            match_method: MatchMethod::FuzzyName,
            suggestions,
        }))
    }
}

fn exact(customer: Customer, confidence: f64, match_method: MatchMethod) -> Resolution {
    Resolution { customer, confidence, match_method, suggestions: Vec::new() }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parley_core::domain::customer::Customer;
    use parley_core::identity::{IdentityHints, MatchMethod};
    use parley_db::repositories::{CustomerRepository, InMemoryCustomerRepository};

    use super::IdentityResolver;

    fn hints(
        external_id: Option<&str>,
        email: Option<&str>,
        phone: Option<&str>,
        name: Option<&str>,
    ) -> IdentityHints {
        IdentityHints {
            external_id: external_id.map(str::to_string),
            email: email.map(str::to_string),
            phone: phone.map(str::to_string),
            name: name.map(str::to_string),
        }
    }

    fn resolver(repo: Arc<InMemoryCustomerRepository>) -> IdentityResolver {
        IdentityResolver::new(repo, "+52")
    }

    #[tokio::test]
    async fn external_id_outranks_every_other_hint() {
        let repo = Arc::new(InMemoryCustomerRepository::default());
        let mut existing = Customer::new_unmatched(
            Some("ext-7".into()),
            Some("other@example.com".into()),
            None,
            None,
        );
        existing.order_count = 3;
        repo.save(existing.clone()).await.expect("seed");

        let resolution = resolver(repo)
            .resolve(&hints(Some("ext-7"), Some("unrelated@example.com"), None, None))
            .await
            .expect("resolve");
        assert_eq!(resolution.customer.id, existing.id);
        assert_eq!(resolution.match_method, MatchMethod::ExternalId);
        assert_eq!(resolution.confidence, 1.0);
    }

    #[tokio::test]
    async fn email_match_backfills_missing_external_id() {
        let repo = Arc::new(InMemoryCustomerRepository::default());
        let existing =
            Customer::new_unmatched(None, Some("ana@example.com".into()), None, None);
        repo.save(existing.clone()).await.expect("seed");

        let resolution = resolver(repo.clone())
            .resolve(&hints(Some("ext-9"), Some("ANA@Example.com "), None, None))
            .await
            .expect("resolve");
        assert_eq!(resolution.match_method, MatchMethod::Email);
        assert_eq!(resolution.confidence, 0.95);

        let stored = repo.find_by_id(&existing.id).await.expect("query").expect("found");
        assert_eq!(stored.external_id.as_deref(), Some("ext-9"));
    }

    #[tokio::test]
    async fn phone_match_backfills_email_and_name() {
        let repo = Arc::new(InMemoryCustomerRepository::default());
        let existing = Customer::new_unmatched(None, None, Some("+525512345678".into()), None);
        repo.save(existing.clone()).await.expect("seed");

        let resolution = resolver(repo.clone())
            .resolve(&hints(None, Some("ana@example.com"), Some("55 1234 5678"), Some("Ana")))
            .await
            .expect("resolve");
        assert_eq!(resolution.match_method, MatchMethod::Phone);
        assert_eq!(resolution.confidence, 0.90);

        let stored = repo.find_by_id(&existing.id).await.expect("query").expect("found");
        assert_eq!(stored.email.as_deref(), Some("ana@example.com"));
        assert_eq!(stored.name.as_deref(), Some("Ana"));
    }

    #[tokio::test]
    async fn fuzzy_name_returns_runner_up_suggestions() {
        let repo = Arc::new(InMemoryCustomerRepository::default());
        for name in ["Maria Perez", "Mario Perez", "Marta Perez", "Mariana Paredes", "Bob"] {
            repo.save(Customer::new_unmatched(None, None, None, Some(name.into())))
                .await
                .expect("seed");
        }

        let resolution = resolver(repo)
            .resolve(&hints(None, None, None, Some("maria perez")))
            .await
            .expect("resolve");
        assert_eq!(resolution.match_method, MatchMethod::FuzzyName);
        assert_eq!(resolution.customer.name.as_deref(), Some("Maria Perez"));
        assert!(resolution.confidence > 0.99);
        assert!(!resolution.suggestions.is_empty());
        assert!(resolution.suggestions.len() <= 3);
        assert!(resolution
            .suggestions
            .iter()
            .all(|customer| customer.name.as_deref() != Some("Bob")));
    }

    #[tokio::test]
    async fn unmatched_hints_create_exactly_one_customer() {
        let repo = Arc::new(InMemoryCustomerRepository::default());
        let resolver = resolver(repo.clone());
        let incoming = hints(None, None, Some("5512345678"), Some("Luz"));

        let first = resolver.resolve(&incoming).await.expect("first resolve");
        assert_eq!(first.match_method, MatchMethod::NewCustomer);
        assert_eq!(first.customer.phone.as_deref(), Some("+525512345678"));

        // Same hints again: the phone stage now hits the stored customer.
        let second = resolver.resolve(&incoming).await.expect("second resolve");
        assert_eq!(second.match_method, MatchMethod::Phone);
        assert_eq!(second.customer.id, first.customer.id);
    }
}
