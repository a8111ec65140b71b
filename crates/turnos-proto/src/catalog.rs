//! Read-only reference data: the condition catalog and the character/monster
//! template index. Both load once from JSON files and degrade to an empty
//! index when a source cannot be read.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::ProtoResult;
use crate::state::loose_number;

/// Keys of the condition derived from hit points rather than stored.
pub const BLEEDING_KEYS: [&str; 2] = ["sangrando", "bleeding"];
const BLEEDING_LABEL: &str = "sangrando";
pub const DEFAULT_CHIP_COLOR: &str = "#8b5cf6";

/// Case- and whitespace-insensitive form used for every lookup.
pub fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionEntry {
    pub key: String,
    #[serde(default)]
    pub english: String,
    #[serde(default)]
    pub spanish: String,
    #[serde(default)]
    pub synonyms: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl ConditionEntry {
    fn aliases(&self) -> impl Iterator<Item = &str> {
        [self.key.as_str(), self.english.as_str(), self.spanish.as_str()]
            .into_iter()
            .chain(self.synonyms.iter().map(String::as_str))
            .filter(|alias| !alias.trim().is_empty())
    }
}

/// One condition as displayed next to a combatant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionChip {
    /// The stored string (or the derived marker).
    pub raw: String,
    pub label: String,
    pub color: String,
    /// Computed from hit points; clicking it does not remove anything.
    pub derived: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ConditionCatalog {
    entries: Vec<ConditionEntry>,
    index: HashMap<String, usize>,
}

impl ConditionCatalog {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Later entries win when two entries share an alias.
    pub fn from_entries(entries: Vec<ConditionEntry>) -> Self {
        let mut index = HashMap::new();
        for (idx, entry) in entries.iter().enumerate() {
            for alias in entry.aliases() {
                index.insert(normalize(alias), idx);
            }
        }
        Self { entries, index }
    }

    pub fn from_json(text: &str) -> ProtoResult<Self> {
        let entries: Vec<ConditionEntry> = serde_json::from_str(text)?;
        Ok(Self::from_entries(entries))
    }

    /// Loads a JSON array of entries. Any failure yields an empty catalog.
    pub fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match fs::read_to_string(path)
            .map_err(Into::into)
            .and_then(|text| Self::from_json(&text))
        {
            Ok(catalog) => {
                debug!(path = %path.display(), entries = catalog.len(), "loaded condition catalog");
                catalog
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "condition catalog unavailable; using empty catalog");
                Self::empty()
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn normalize(&self, name: &str) -> String {
        normalize(name)
    }

    pub fn lookup(&self, name: &str) -> Option<&ConditionEntry> {
        self.index
            .get(&normalize(name))
            .and_then(|&idx| self.entries.get(idx))
    }

    /// The entry key for known conditions, the normalized raw value otherwise.
    pub fn canonical_key(&self, name: &str) -> String {
        match self.lookup(name) {
            Some(entry) => normalize(&entry.key),
            None => normalize(name),
        }
    }

    pub fn display_name(&self, name: &str) -> String {
        self.lookup(name)
            .map(|entry| entry.spanish.trim())
            .filter(|label| !label.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| name.to_string())
    }

    pub fn color(&self, name: &str) -> String {
        self.lookup(name)
            .and_then(|entry| entry.color.clone())
            .unwrap_or_else(|| DEFAULT_CHIP_COLOR.to_string())
    }

    pub fn is_bleeding(&self, name: &str) -> bool {
        let raw = normalize(name);
        let key = self.canonical_key(name);
        BLEEDING_KEYS
            .iter()
            .any(|marker| raw == *marker || key == *marker)
    }

    /// Autocomplete labels: every spanish, english and synonym string, sorted
    /// case-insensitively and de-duplicated.
    pub fn suggestions(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut labels = Vec::new();
        for entry in &self.entries {
            let candidates = [entry.spanish.as_str(), entry.english.as_str()]
                .into_iter()
                .chain(entry.synonyms.iter().map(String::as_str));
            for label in candidates.filter(|l| !l.trim().is_empty()) {
                if seen.insert(label.to_string()) {
                    labels.push(label.to_string());
                }
            }
        }
        labels.sort_by_key(|label| label.to_lowercase());
        labels
    }

    /// Display list for a combatant's conditions. Duplicates (by canonical
    /// key) collapse to the first occurrence; the bleeding marker is derived
    /// from `bloodied` and never taken from storage.
    pub fn chips(&self, conditions: &[String], bloodied: bool) -> Vec<ConditionChip> {
        let mut seen = BTreeSet::new();
        let mut chips = Vec::new();
        for raw in conditions {
            if self.is_bleeding(raw) {
                continue;
            }
            if !seen.insert(self.canonical_key(raw)) {
                continue;
            }
            chips.push(ConditionChip {
                raw: raw.clone(),
                label: self.display_name(raw),
                color: self.color(raw),
                derived: false,
            });
        }
        if bloodied {
            chips.push(ConditionChip {
                raw: BLEEDING_LABEL.to_string(),
                label: self.display_name(BLEEDING_LABEL),
                color: self.color(BLEEDING_LABEL),
                derived: true,
            });
        }
        chips
    }
}

/// Character or monster template used to pre-fill a combatant whose name
/// matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub nombre: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icono: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca: Option<Value>,
    /// Maximum hit points.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pv: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mov: Option<Value>,
}

impl Template {
    /// `icon` wins over `icono`; empty strings count as no icon.
    pub fn icon(&self) -> Option<&str> {
        self.icon
            .as_deref()
            .filter(|s| !s.is_empty())
            .or_else(|| self.icono.as_deref().filter(|s| !s.is_empty()))
    }

    /// Armor only applies when written as a plain number.
    pub fn armor(&self) -> Option<f64> {
        match &self.ca {
            Some(Value::Number(n)) => n.as_f64(),
            _ => None,
        }
    }

    pub fn hit_points(&self) -> Option<f64> {
        self.pv.as_ref().and_then(loose_number)
    }

    pub fn movement(&self) -> Option<f64> {
        self.mov.as_ref().and_then(loose_number)
    }
}

/// Name-indexed templates merged from any number of source catalogs.
#[derive(Debug, Clone, Default)]
pub struct TemplateIndex {
    templates: HashMap<String, Template>,
}

impl TemplateIndex {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Later templates replace earlier ones with the same name.
    pub fn from_templates(templates: impl IntoIterator<Item = Template>) -> Self {
        let mut index = Self::default();
        index.extend(templates);
        index
    }

    pub fn extend(&mut self, templates: impl IntoIterator<Item = Template>) {
        for template in templates {
            let key = normalize(&template.nombre);
            if key.is_empty() {
                continue;
            }
            self.templates.insert(key, template);
        }
    }

    /// Parses a JSON array, skipping records that are not templates.
    pub fn parse_source(text: &str) -> ProtoResult<Vec<Template>> {
        let records: Vec<Value> = serde_json::from_str(text)?;
        Ok(records
            .into_iter()
            .filter_map(|record| serde_json::from_value::<Template>(record).ok())
            .collect())
    }

    /// Merges every readable source in order; unreadable sources contribute
    /// nothing.
    pub fn load<P: AsRef<Path>>(sources: &[P]) -> Self {
        let mut index = Self::default();
        for source in sources {
            let path = source.as_ref();
            let parsed = fs::read_to_string(path)
                .map_err(Into::into)
                .and_then(|text| Self::parse_source(&text));
            match parsed {
                Ok(templates) => {
                    debug!(path = %path.display(), templates = templates.len(), "loaded template source");
                    index.extend(templates);
                }
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "template source unavailable; skipping");
                }
            }
        }
        index
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub fn lookup(&self, name: &str) -> Option<&Template> {
        self.templates.get(&normalize(name))
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .templates
            .values()
            .map(|t| t.nombre.as_str())
            .collect();
        names.sort_by_key(|name| name.to_lowercase());
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Combatant;
    use serde_json::json;
    use std::io::Write;

    fn catalog() -> ConditionCatalog {
        ConditionCatalog::from_json(
            &json!([
                {"key":"poisoned","english":"Poisoned","spanish":"Envenenado","synonyms":["poison"],"color":"#22c55e"},
                {"key":"prone","english":"Prone","spanish":"Derribado","synonyms":["tumbado"]},
                {"key":"bleeding","english":"Bleeding","spanish":"Sangrando","color":"#ef4444"}
            ])
            .to_string(),
        )
        .unwrap()
    }

    #[test_timeout::timeout]
    fn lookup_matches_every_alias_regardless_of_case_and_spacing() {
        let catalog = catalog();
        let a = catalog.lookup("POISONED").unwrap();
        let b = catalog.lookup(" envenenado ").unwrap();
        let c = catalog.lookup("Poison").unwrap();
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(a.key, "poisoned");
        assert!(catalog.lookup("charmed").is_none());
        assert_eq!(catalog.canonical_key("Tumbado"), "prone");
        assert_eq!(catalog.canonical_key(" Charmed "), "charmed");
    }

    #[test_timeout::timeout]
    fn display_falls_back_to_raw_values() {
        let catalog = catalog();
        assert_eq!(catalog.display_name("poison"), "Envenenado");
        assert_eq!(catalog.display_name("concentrado"), "concentrado");
        assert_eq!(catalog.color("prone"), DEFAULT_CHIP_COLOR);
        assert_eq!(catalog.color("poisoned"), "#22c55e");
    }

    #[test_timeout::timeout]
    fn missing_catalog_file_degrades_to_empty() {
        let catalog = ConditionCatalog::load("/definitely/not/here/conditions.json");
        assert!(catalog.is_empty());
        assert!(catalog.lookup("poisoned").is_none());
        assert_eq!(catalog.display_name("Poisoned"), "Poisoned");
    }

    #[test_timeout::timeout]
    fn suggestions_are_sorted_and_unique() {
        let labels = catalog().suggestions();
        assert_eq!(labels.first().map(String::as_str), Some("Bleeding"));
        assert!(labels.contains(&"tumbado".to_string()));
        let unique: BTreeSet<_> = labels.iter().collect();
        assert_eq!(unique.len(), labels.len());
    }

    #[test_timeout::timeout]
    fn chips_dedupe_and_derive_bleeding() {
        let catalog = catalog();
        let conditions = vec![
            "poison".to_string(),
            "Envenenado".to_string(),
            "sangrando".to_string(),
            "miedo".to_string(),
        ];
        let chips = catalog.chips(&conditions, false);
        let labels: Vec<_> = chips.iter().map(|c| c.label.as_str()).collect();
        assert_eq!(labels, vec!["Envenenado", "miedo"]);

        let chips = catalog.chips(&conditions, true);
        let last = chips.last().unwrap();
        assert!(last.derived);
        assert_eq!(last.label, "Sangrando");
        assert_eq!(last.color, "#ef4444");
    }

    #[test_timeout::timeout]
    fn combatant_condition_edits_use_canonical_keys() {
        let catalog = catalog();
        let mut c = Combatant::new("Grerin");
        assert!(c.add_condition(" Poisoned ", &catalog));
        assert!(!c.add_condition("envenenado", &catalog));
        assert!(!c.add_condition("   ", &catalog));
        assert_eq!(c.condiciones, vec!["Poisoned".to_string()]);

        assert!(!c.toggle_condition("POISON", &catalog));
        assert!(c.condiciones.is_empty());
        assert!(c.toggle_condition("prone", &catalog));
        assert_eq!(c.condiciones, vec!["prone".to_string()]);

        c.set_hp_max(30.0);
        c.set_hp_current(10.0);
        let chips = c.display_conditions(&catalog);
        assert!(chips.iter().any(|chip| chip.derived));
    }

    #[test_timeout::timeout]
    fn template_sources_merge_with_later_sources_winning() {
        let dir = tempfile::tempdir().unwrap();
        let characters = dir.path().join("personajes.json");
        let monsters = dir.path().join("monstruos.json");
        let mut file = fs::File::create(&characters).unwrap();
        write!(
            file,
            "{}",
            json!([
                {"nombre":"Grerin Beibalar","icon":"grerin.webp","ca":16,"pv":33,"mov":9},
                {"nombre":"Goblin","ca":13,"pv":7,"mov":"9"},
                {"no_name": true}
            ])
        )
        .unwrap();
        fs::write(
            &monsters,
            json!([{"nombre":"goblin","icono":"goblin.png","ca":15,"pv":"11","mov":"7,5"}]).to_string(),
        )
        .unwrap();

        let index = TemplateIndex::load(&[
            characters.as_path(),
            dir.path().join("missing.json").as_path(),
            monsters.as_path(),
        ]);
        assert_eq!(index.len(), 2);
        assert_eq!(index.names(), vec!["goblin", "Grerin Beibalar"]);

        let goblin = index.lookup(" GOBLIN ").unwrap();
        assert_eq!(goblin.icon(), Some("goblin.png"));
        assert_eq!(goblin.movement(), Some(7.5));
        assert!(index.lookup("Gob").is_none());
    }

    #[test_timeout::timeout]
    fn applying_a_template_resets_the_combatant() {
        let template: Template = serde_json::from_value(json!({
            "nombre": "Ogro",
            "icono": "ogro.png",
            "ca": 11.4,
            "pv": 59,
            "mov": "7,4"
        }))
        .unwrap();
        let mut c = Combatant::new("Ogro");
        c.accion = true;
        c.condiciones.push("prone".into());
        c.apply_template(&template);
        assert_eq!(c.icon.as_deref(), Some("ogro.png"));
        assert_eq!(c.ca, 11);
        assert_eq!((c.pv.cur, c.pv.max), (59, 59));
        assert_eq!((c.mov.cur, c.mov.max), (7.5, 7.5));
        assert!(!c.accion);
        assert!(c.condiciones.is_empty());

        let bare: Template = serde_json::from_value(json!({"nombre":"Nadie","ca":"12"})).unwrap();
        c.apply_template(&bare);
        assert_eq!(c.icon, None);
        assert_eq!(c.ca, 11, "string armor values are ignored");
        assert_eq!(c.pv.max, 59);
    }
}
