use fluent_bundle::concurrent::FluentBundle;
use fluent_bundle::{FluentArgs, FluentResource, FluentValue};
use std::collections::HashMap;
use std::sync::LazyLock;
use tracing::warn;
use unic_langid::LanguageIdentifier;

const ENGLISH_FTL: &str = include_str!("../locales/en/main.ftl");
const ARABIC_FTL: &str = include_str!("../locales/ar/main.ftl");

/// Languages the bot speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Language {
    English,
    Arabic,
}

impl Language {
    pub const ALL: [Language; 2] = [Language::English, Language::Arabic];

    pub fn code(&self) -> &'static str {
        match self {
            Language::English => "en",
            Language::Arabic => "ar",
        }
    }
}

/// Map a Telegram `language_code` onto a supported language
pub fn detect_language(language_code: Option<&str>) -> Language {
    match language_code {
        Some(code) if code.to_lowercase().starts_with("ar") => Language::Arabic,
        _ => Language::English,
    }
}

/// Localization manager for the complaint desk
pub struct LocalizationManager {
    bundles: HashMap<Language, FluentBundle<FluentResource>>,
}

impl LocalizationManager {
    /// Create a manager holding both embedded catalogs
    pub fn new() -> Self {
        let mut bundles = HashMap::new();
        bundles.insert(Language::English, Self::create_bundle(Language::English, ENGLISH_FTL));
        bundles.insert(Language::Arabic, Self::create_bundle(Language::Arabic, ARABIC_FTL));
        Self { bundles }
    }

    fn create_bundle(language: Language, source: &str) -> FluentBundle<FluentResource> {
        let locale: LanguageIdentifier = language.code().parse().unwrap_or_default();
        let mut bundle = FluentBundle::new_concurrent(vec![locale]);
        // Telegram renders the bidi isolation marks literally in some clients
        bundle.set_use_isolating(false);

        let resource = match FluentResource::try_new(source.to_string()) {
            Ok(resource) => resource,
            Err((resource, errors)) => {
                warn!(language = language.code(), error_count = errors.len(), "Locale file has syntax errors");
                resource
            }
        };
        if let Err(errors) = bundle.add_resource(resource) {
            warn!(language = language.code(), error_count = errors.len(), "Locale file has duplicate keys");
        }
        bundle
    }

    /// Whether `key` exists in the given language
    pub fn has_message(&self, key: &str, language: Language) -> bool {
        self.bundles
            .get(&language)
            .is_some_and(|bundle| bundle.has_message(key))
    }

    /// Get a localized message; never fails, a missing key renders as a marked placeholder
    pub fn get_message(&self, key: &str, language: Language, args: &[(&str, &str)]) -> String {
        let Some(bundle) = self.bundles.get(&language) else {
            return format!("Missing translation: {key}");
        };

        let Some(pattern) = bundle.get_message(key).and_then(|msg| msg.value()) else {
            return format!("Missing translation: {key}");
        };

        let fluent_args = if args.is_empty() {
            None
        } else {
            let mut fluent_args = FluentArgs::new();
            for (name, value) in args {
                fluent_args.set(*name, FluentValue::from(*value));
            }
            Some(fluent_args)
        };

        let mut errors = vec![];
        let value = bundle.format_pattern(pattern, fluent_args.as_ref(), &mut errors);
        if !errors.is_empty() {
            warn!(key = key, language = language.code(), "Message rendered with unresolved arguments");
        }
        value.into_owned()
    }
}

impl Default for LocalizationManager {
    fn default() -> Self {
        Self::new()
    }
}

static LOCALIZATION_MANAGER: LazyLock<LocalizationManager> = LazyLock::new(LocalizationManager::new);

/// Get the global localization manager
pub fn get_localization_manager() -> &'static LocalizationManager {
    &LOCALIZATION_MANAGER
}

/// Convenience function to get a localized message
pub fn t_lang(key: &str, language: Language) -> String {
    get_localization_manager().get_message(key, language, &[])
}

/// Convenience function to get a localized message with arguments
pub fn t_args_lang(key: &str, args: &[(&str, &str)], language: Language) -> String {
    get_localization_manager().get_message(key, language, args)
}

/// The rendering of `key` in every supported language
pub fn all_translations(key: &str) -> Vec<String> {
    Language::ALL.iter().map(|language| t_lang(key, *language)).collect()
}
