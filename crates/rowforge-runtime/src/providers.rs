use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate};
use fake::Fake;
use fake::faker::address::en::CityName;
use fake::faker::company::en::CompanyName;
use fake::faker::internet::en::SafeEmail;
use fake::faker::lorem::en::{Sentence, Word};
use fake::faker::name::en::{FirstName, LastName, Name};
use fake::faker::phone_number::en::PhoneNumber;
use rand::seq::IndexedRandom;
use rand::{Rng, RngCore};

use rowforge_core::FieldValue;

use crate::errors::{Result, RuntimeError};

/// Values available to providers besides their arguments.
#[derive(Debug, Clone, Copy)]
pub struct ProviderContext<'a> {
    pub today: NaiveDate,
    pub table: &'a str,
}

/// Named source of synthetic values callable from recipes.
pub trait ValueProvider: Send + Sync {
    fn id(&self) -> &'static str;

    fn generate(
        &self,
        ctx: &ProviderContext<'_>,
        args: &[FieldValue],
        rng: &mut dyn RngCore,
    ) -> Result<FieldValue>;
}

/// Registry of providers addressable by id.
pub struct ProviderRegistry {
    providers: BTreeMap<&'static str, Box<dyn ValueProvider>>,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderRegistry {
    /// Registry preloaded with the builtin providers.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        for kind in FakerKind::ALL {
            registry.register_provider(Box::new(FakerProvider { kind }));
        }
        registry.register_provider(Box::new(RandomNumber));
        registry.register_provider(Box::new(RandomChoice));
        registry.register_provider(Box::new(DateBetween));
        registry.register_provider(Box::new(ChangeCase { upper: true }));
        registry.register_provider(Box::new(ChangeCase { upper: false }));
        registry
    }

    pub fn empty() -> Self {
        Self {
            providers: BTreeMap::new(),
        }
    }

    /// Add a provider, replacing any provider with the same id.
    pub fn register_provider(&mut self, provider: Box<dyn ValueProvider>) {
        self.providers.insert(provider.id(), provider);
    }

    pub fn ids(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.providers.keys().copied()
    }

    pub fn call(
        &self,
        id: &str,
        ctx: &ProviderContext<'_>,
        args: &[FieldValue],
        rng: &mut dyn RngCore,
    ) -> Result<FieldValue> {
        let provider = self
            .providers
            .get(id)
            .ok_or_else(|| RuntimeError::UnknownName(id.to_string()))?;
        provider.generate(ctx, args, rng)
    }
}

#[derive(Debug, Clone, Copy)]
enum FakerKind {
    FirstName,
    LastName,
    Name,
    Email,
    Company,
    City,
    PhoneNumber,
    Word,
    Sentence,
}

impl FakerKind {
    const ALL: [FakerKind; 9] = [
        FakerKind::FirstName,
        FakerKind::LastName,
        FakerKind::Name,
        FakerKind::Email,
        FakerKind::Company,
        FakerKind::City,
        FakerKind::PhoneNumber,
        FakerKind::Word,
        FakerKind::Sentence,
    ];
}

struct FakerProvider {
    kind: FakerKind,
}

impl ValueProvider for FakerProvider {
    fn id(&self) -> &'static str {
        match self.kind {
            FakerKind::FirstName => "first_name",
            FakerKind::LastName => "last_name",
            FakerKind::Name => "name",
            FakerKind::Email => "email",
            FakerKind::Company => "company",
            FakerKind::City => "city",
            FakerKind::PhoneNumber => "phone_number",
            FakerKind::Word => "word",
            FakerKind::Sentence => "sentence",
        }
    }

    fn generate(
        &self,
        _ctx: &ProviderContext<'_>,
        args: &[FieldValue],
        rng: &mut dyn RngCore,
    ) -> Result<FieldValue> {
        expect_args(self.id(), args, 0)?;
        let value: String = match self.kind {
            FakerKind::FirstName => FirstName().fake_with_rng(rng),
            FakerKind::LastName => LastName().fake_with_rng(rng),
            FakerKind::Name => Name().fake_with_rng(rng),
            FakerKind::Email => SafeEmail().fake_with_rng(rng),
            FakerKind::Company => CompanyName().fake_with_rng(rng),
            FakerKind::City => CityName().fake_with_rng(rng),
            FakerKind::PhoneNumber => PhoneNumber().fake_with_rng(rng),
            FakerKind::Word => Word().fake_with_rng(rng),
            FakerKind::Sentence => Sentence(3..8).fake_with_rng(rng),
        };
        Ok(FieldValue::Text(value))
    }
}

/// `random_number(min, max)`: integer in the inclusive range.
struct RandomNumber;

impl ValueProvider for RandomNumber {
    fn id(&self) -> &'static str {
        "random_number"
    }

    fn generate(
        &self,
        _ctx: &ProviderContext<'_>,
        args: &[FieldValue],
        rng: &mut dyn RngCore,
    ) -> Result<FieldValue> {
        expect_args(self.id(), args, 2)?;
        let min = args[0].as_i64()?;
        let max = args[1].as_i64()?;
        if min > max {
            return Err(provider_error(
                self.id(),
                format!("min {min} is greater than max {max}"),
            ));
        }
        Ok(FieldValue::Int(rng.random_range(min..=max)))
    }
}

/// `random_choice(a, b, ...)`: one of the arguments.
struct RandomChoice;

impl ValueProvider for RandomChoice {
    fn id(&self) -> &'static str {
        "random_choice"
    }

    fn generate(
        &self,
        _ctx: &ProviderContext<'_>,
        args: &[FieldValue],
        rng: &mut dyn RngCore,
    ) -> Result<FieldValue> {
        args.choose(rng)
            .cloned()
            .ok_or_else(|| provider_error(self.id(), "needs at least one choice".to_string()))
    }
}

/// `date_between(start_days, end_days)`: date offset from the anchor date.
struct DateBetween;

impl ValueProvider for DateBetween {
    fn id(&self) -> &'static str {
        "date_between"
    }

    fn generate(
        &self,
        ctx: &ProviderContext<'_>,
        args: &[FieldValue],
        rng: &mut dyn RngCore,
    ) -> Result<FieldValue> {
        expect_args(self.id(), args, 2)?;
        let start = args[0].as_i64()?;
        let end = args[1].as_i64()?;
        if start > end {
            return Err(provider_error(
                self.id(),
                format!("start offset {start} is after end offset {end}"),
            ));
        }
        let offset = rng.random_range(start..=end);
        Duration::try_days(offset)
            .and_then(|days| ctx.today.checked_add_signed(days))
            .map(FieldValue::Date)
            .ok_or_else(|| provider_error(self.id(), format!("offset {offset} is out of range")))
    }
}

/// `upper(text)` / `lower(text)`.
struct ChangeCase {
    upper: bool,
}

impl ValueProvider for ChangeCase {
    fn id(&self) -> &'static str {
        if self.upper { "upper" } else { "lower" }
    }

    fn generate(
        &self,
        _ctx: &ProviderContext<'_>,
        args: &[FieldValue],
        _rng: &mut dyn RngCore,
    ) -> Result<FieldValue> {
        expect_args(self.id(), args, 1)?;
        let text = args[0].to_string();
        Ok(FieldValue::Text(if self.upper {
            text.to_uppercase()
        } else {
            text.to_lowercase()
        }))
    }
}

fn expect_args(id: &str, args: &[FieldValue], expected: usize) -> Result<()> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(provider_error(
            id,
            format!("expected {expected} argument(s), got {}", args.len()),
        ))
    }
}

fn provider_error(id: &str, message: String) -> RuntimeError {
    RuntimeError::Provider {
        name: id.to_string(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use super::*;

    fn ctx() -> ProviderContext<'static> {
        ProviderContext {
            today: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            table: "Account",
        }
    }

    #[test]
    fn builtins_are_registered() {
        let registry = ProviderRegistry::new();
        let ids: Vec<&str> = registry.ids().collect();
        for id in ["first_name", "email", "random_number", "random_choice", "date_between"] {
            assert!(ids.contains(&id), "missing {id}");
        }
    }

    #[test]
    fn same_seed_same_values() {
        let registry = ProviderRegistry::new();
        let mut first = ChaCha8Rng::seed_from_u64(99);
        let mut second = ChaCha8Rng::seed_from_u64(99);

        let a = registry.call("name", &ctx(), &[], &mut first).unwrap();
        let b = registry.call("name", &ctx(), &[], &mut second).unwrap();
        assert_eq!(a, b);
        assert!(matches!(a, FieldValue::Text(ref text) if !text.is_empty()));
    }

    #[test]
    fn random_number_respects_bounds() {
        let registry = ProviderRegistry::new();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let args = [FieldValue::Int(3), FieldValue::Int(5)];
        for _ in 0..20 {
            let value = registry.call("random_number", &ctx(), &args, &mut rng).unwrap();
            let value = value.as_i64().unwrap();
            assert!((3..=5).contains(&value));
        }

        let err = registry
            .call("random_number", &ctx(), &[FieldValue::Int(1)], &mut rng)
            .expect_err("expected arity error");
        assert!(err.to_string().contains("expected 2 argument(s)"));
    }

    #[test]
    fn date_between_offsets_from_anchor() {
        let registry = ProviderRegistry::new();
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        let args = [FieldValue::Int(0), FieldValue::Int(0)];
        let value = registry.call("date_between", &ctx(), &args, &mut rng).unwrap();
        assert_eq!(value, FieldValue::Date(ctx().today));
    }

    #[test]
    fn date_between_rejects_offsets_past_the_calendar() {
        let registry = ProviderRegistry::new();
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        for args in [
            [FieldValue::Int(i64::MAX - 1), FieldValue::Int(i64::MAX)],
            [FieldValue::Int(100_000_000), FieldValue::Int(100_000_001)],
        ] {
            let err = registry
                .call("date_between", &ctx(), &args, &mut rng)
                .expect_err("expected out of range offset");
            assert!(
                matches!(err, RuntimeError::Provider { ref name, .. } if name == "date_between"),
                "unexpected error {err:?}"
            );
        }
    }

    #[test]
    fn unknown_provider_is_an_unknown_name() {
        let registry = ProviderRegistry::new();
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        assert!(matches!(
            registry.call("nope", &ctx(), &[], &mut rng),
            Err(RuntimeError::UnknownName(_))
        ));
    }
}
