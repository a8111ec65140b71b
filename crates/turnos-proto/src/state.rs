//! Encounter snapshot: the unit of synchronization.
//!
//! Field names follow the JSON the browser clients already exchange
//! (`activeIdx`, `nombre`, `pv`, `mov`, ...). Deserialization is lenient about
//! the legacy shapes older clients wrote; mutations re-establish the pool
//! invariants (`0 <= cur <= max`) every time they run.

use std::cmp::Ordering;
use std::collections::HashSet;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::catalog::{ConditionCatalog, ConditionChip, Template};

const NEW_NAME: &str = "Nuevo";
const NEW_HIDDEN_NAME: &str = "(Oculto)";

/// Rounds to the nearest half step (movement is tracked in 0.5 m).
pub fn round_half(value: f64) -> f64 {
    (value * 2.0).round() / 2.0
}

/// Reads a number written either as a JSON number or as a string that may
/// use a decimal comma (`"7,5"`).
pub fn loose_number(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().replace(',', ".").parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

fn lenient_int<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    let raw = Value::deserialize(deserializer)?;
    Ok(loose_number(&raw).map(|v| v.round() as i64).unwrap_or(0))
}

fn lenient_index<'de, D: Deserializer<'de>>(deserializer: D) -> Result<usize, D::Error> {
    let raw = Value::deserialize(deserializer)?;
    Ok(loose_number(&raw)
        .map(|v| v.round().max(0.0) as usize)
        .unwrap_or(0))
}

fn lenient_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let raw = Value::deserialize(deserializer)?;
    Ok(match raw {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        _ => String::new(),
    })
}

fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(match raw {
        Some(Value::String(s)) => s,
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    })
}

fn lenient_conditions<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Vec<String>, D::Error> {
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(match raw {
        Some(Value::Array(items)) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    })
}

fn default_visible() -> bool {
    true
}

fn is_true(value: &bool) -> bool {
    *value
}

/// Splits a pool written as a bare number or numeric string (legacy:
/// current == max) or as a `{cur, max, tmp}` object. Anything else is empty.
fn pool_parts(raw: &Value) -> (f64, f64, Option<f64>) {
    match raw {
        Value::Object(pair) => {
            let cur = pair.get("cur").and_then(loose_number).unwrap_or(0.0);
            let max = pair.get("max").and_then(loose_number).unwrap_or(cur);
            (cur, max, pair.get("tmp").and_then(loose_number))
        }
        other => match loose_number(other) {
            Some(v) => (v, v, None),
            None => (0.0, 0.0, None),
        },
    }
}

/// Truthiness the browser clients apply to flags such as `accion`.
fn truthy(raw: &Value) -> bool {
    match raw {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(false, |v| v != 0.0 && !v.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn lenient_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(raw.as_ref().map_or(false, truthy))
}

/// Only an explicit `false` hides a combatant.
fn lenient_visible<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(!matches!(raw, Some(Value::Bool(false))))
}

fn lenient_icon<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(match raw {
        Some(Value::String(s)) if !s.is_empty() => Some(s),
        _ => None,
    })
}

/// Rows that are not JSON objects cannot be combatants and are skipped; a
/// `party` that is not an array reads as empty.
fn lenient_party<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Vec<Combatant>, D::Error> {
    let raw = Option::<Value>::deserialize(deserializer)?;
    let Some(Value::Array(rows)) = raw else {
        return Ok(Vec::new());
    };
    Ok(rows
        .into_iter()
        .filter(Value::is_object)
        .filter_map(|row| serde_json::from_value(row).ok())
        .collect())
}

/// Hit points (`pv`). `tmp` is carried for clients that track temporary
/// hit points; nothing here interprets it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "Value")]
pub struct HitPoints {
    pub cur: i64,
    pub max: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tmp: Option<i64>,
}

impl From<Value> for HitPoints {
    fn from(raw: Value) -> Self {
        let (cur, max, tmp) = pool_parts(&raw);
        Self {
            cur: cur.round() as i64,
            max: max.round() as i64,
            tmp: tmp.map(|t| t.round() as i64),
        }
    }
}

impl HitPoints {
    pub fn full(max: i64) -> Self {
        let max = max.max(0);
        Self {
            cur: max,
            max,
            tmp: None,
        }
    }

    pub fn clamp(&mut self) {
        self.max = self.max.max(0);
        self.cur = self.cur.clamp(0, self.max);
    }

    /// Below half of the maximum; drives the derived bleeding marker.
    pub fn is_bloodied(&self) -> bool {
        self.max > 0 && (self.cur as f64) < (self.max as f64) / 2.0
    }
}

/// Movement (`mov`) in metres, half-step precision.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "Value")]
pub struct Movement {
    pub cur: f64,
    pub max: f64,
}

impl From<Value> for Movement {
    fn from(raw: Value) -> Self {
        let (cur, max, _) = pool_parts(&raw);
        Self { cur, max }
    }
}

impl Movement {
    pub fn full(max: f64) -> Self {
        let max = round_half(max).max(0.0);
        Self { cur: max, max }
    }

    pub fn clamp(&mut self) {
        if !self.max.is_finite() || self.max < 0.0 {
            self.max = 0.0;
        }
        if !self.cur.is_finite() {
            self.cur = 0.0;
        }
        self.cur = self.cur.clamp(0.0, self.max);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionSlot {
    /// `accion`
    Action,
    /// `adicional`
    Bonus,
    /// `reaccion`
    Reaction,
}

/// One tracked row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Combatant {
    #[serde(default, deserialize_with = "lenient_id")]
    pub id: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub nombre: String,
    #[serde(default, deserialize_with = "lenient_int")]
    pub ini: i64,
    #[serde(default, deserialize_with = "lenient_int")]
    pub ca: i64,
    #[serde(default)]
    pub pv: HitPoints,
    #[serde(default)]
    pub mov: Movement,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub accion: bool,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub adicional: bool,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub reaccion: bool,
    #[serde(
        default,
        deserialize_with = "lenient_icon",
        skip_serializing_if = "Option::is_none"
    )]
    pub icon: Option<String>,
    #[serde(default, deserialize_with = "lenient_conditions")]
    pub condiciones: Vec<String>,
    #[serde(
        default = "default_visible",
        deserialize_with = "lenient_visible",
        skip_serializing_if = "is_true"
    )]
    pub visible: bool,
    /// Fields this crate does not model, kept so a relayed snapshot loses
    /// nothing another client wrote.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Combatant {
    pub fn new(nombre: impl Into<String>) -> Self {
        Self {
            id: new_combatant_id(),
            nombre: nombre.into(),
            ini: 0,
            ca: 10,
            pv: HitPoints::full(10),
            mov: Movement::full(9.0),
            accion: false,
            adicional: false,
            reaccion: false,
            icon: None,
            condiciones: Vec::new(),
            visible: true,
            extra: Map::new(),
        }
    }

    /// `icon`, falling back to the template-style `icono` key.
    pub fn icon_ref(&self) -> Option<&str> {
        self.icon
            .as_deref()
            .filter(|s| !s.is_empty())
            .or_else(|| self.extra.get("icono").and_then(Value::as_str))
            .filter(|s| !s.is_empty())
    }

    /// Initials for the generated avatar when there is no icon.
    pub fn initials(&self) -> String {
        let initials: String = self
            .nombre
            .split_whitespace()
            .filter_map(|w| w.chars().next())
            .flat_map(char::to_uppercase)
            .take(2)
            .collect();
        if initials.is_empty() {
            "??".to_string()
        } else {
            initials
        }
    }

    pub fn set_hp_current(&mut self, value: f64) -> bool {
        if !value.is_finite() {
            return false;
        }
        self.pv.cur = value.round() as i64;
        self.pv.clamp();
        true
    }

    pub fn set_hp_max(&mut self, value: f64) -> bool {
        if !value.is_finite() {
            return false;
        }
        self.pv.max = value.round() as i64;
        self.pv.clamp();
        true
    }

    pub fn set_move_current(&mut self, value: f64) -> bool {
        if !value.is_finite() {
            return false;
        }
        self.mov.cur = round_half(value);
        self.mov.clamp();
        true
    }

    pub fn set_move_max(&mut self, value: f64) -> bool {
        if !value.is_finite() {
            return false;
        }
        self.mov.max = round_half(value);
        self.mov.clamp();
        true
    }

    pub fn set_armor(&mut self, value: f64) -> bool {
        if !value.is_finite() {
            return false;
        }
        self.ca = (value.round() as i64).max(0);
        true
    }

    /// Callers re-sort the party afterwards.
    pub fn set_initiative(&mut self, value: f64) -> bool {
        if !value.is_finite() {
            return false;
        }
        self.ini = value.round() as i64;
        true
    }

    pub fn slot(&self, slot: ActionSlot) -> bool {
        match slot {
            ActionSlot::Action => self.accion,
            ActionSlot::Bonus => self.adicional,
            ActionSlot::Reaction => self.reaccion,
        }
    }

    pub fn toggle(&mut self, slot: ActionSlot) -> bool {
        let flag = match slot {
            ActionSlot::Action => &mut self.accion,
            ActionSlot::Bonus => &mut self.adicional,
            ActionSlot::Reaction => &mut self.reaccion,
        };
        *flag = !*flag;
        *flag
    }

    pub fn reset_for_turn(&mut self) {
        self.accion = false;
        self.adicional = false;
        self.reaccion = false;
        self.mov.clamp();
        self.mov.cur = self.mov.max;
    }

    /// Appends `name` unless a condition with the same canonical key is
    /// already present. Returns whether the list changed.
    pub fn add_condition(&mut self, name: &str, catalog: &ConditionCatalog) -> bool {
        let name = name.trim();
        if name.is_empty() {
            return false;
        }
        let key = catalog.canonical_key(name);
        if self
            .condiciones
            .iter()
            .any(|existing| catalog.canonical_key(existing) == key)
        {
            return false;
        }
        self.condiciones.push(name.to_string());
        true
    }

    /// Removes the first condition matching `name`, or appends it when absent.
    /// Returns `true` if the condition is present afterwards.
    pub fn toggle_condition(&mut self, name: &str, catalog: &ConditionCatalog) -> bool {
        let key = catalog.canonical_key(name);
        match self
            .condiciones
            .iter()
            .position(|existing| catalog.canonical_key(existing) == key)
        {
            Some(idx) => {
                self.condiciones.remove(idx);
                false
            }
            None => {
                let name = name.trim();
                if name.is_empty() {
                    return false;
                }
                self.condiciones.push(name.to_string());
                true
            }
        }
    }

    pub fn display_conditions(&self, catalog: &ConditionCatalog) -> Vec<ConditionChip> {
        catalog.chips(&self.condiciones, self.pv.is_bloodied())
    }

    /// Pre-fills this combatant from a template: stats are reset to the
    /// template's maxima, action flags and conditions are cleared.
    pub fn apply_template(&mut self, template: &Template) {
        self.icon = template.icon().map(str::to_string);
        self.extra.remove("icono");

        if let Some(ca) = template.armor() {
            self.ca = (ca.round() as i64).max(0);
        }
        if let Some(pv) = template.hit_points() {
            self.pv.max = (pv.round() as i64).max(0);
            self.pv.cur = self.pv.max;
        }
        if let Some(mov) = template.movement() {
            self.mov.max = round_half(mov).max(0.0);
            self.mov.cur = self.mov.max;
        }

        self.accion = false;
        self.adicional = false;
        self.reaccion = false;
        self.condiciones.clear();
    }

    fn clamp(&mut self) {
        self.ca = self.ca.max(0);
        self.pv.clamp();
        self.mov.clamp();
    }
}

pub fn new_combatant_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// A combatant as the viewer renders it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VisibleRow<'a> {
    pub index: usize,
    pub combatant: &'a Combatant,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    #[serde(default, deserialize_with = "lenient_index")]
    pub active_idx: usize,
    #[serde(default, deserialize_with = "lenient_party")]
    pub party: Vec<Combatant>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SessionState {
    pub fn new(party: Vec<Combatant>) -> Self {
        let mut state = Self {
            active_idx: 0,
            party,
            extra: Map::new(),
        };
        state.normalize();
        state
    }

    pub fn active(&self) -> Option<&Combatant> {
        self.party.get(self.active_idx)
    }

    pub fn active_mut(&mut self) -> Option<&mut Combatant> {
        self.party.get_mut(self.active_idx)
    }

    pub fn get(&self, id: &str) -> Option<&Combatant> {
        self.party.iter().find(|c| c.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Combatant> {
        self.party.iter_mut().find(|c| c.id == id)
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.party.iter().position(|c| c.id == id)
    }

    /// Re-establishes every invariant: unique non-empty ids, pools clamped,
    /// `activeIdx` in bounds (0 for an empty party).
    pub fn normalize(&mut self) {
        let mut seen = HashSet::new();
        for combatant in &mut self.party {
            if combatant.id.is_empty() || !seen.insert(combatant.id.clone()) {
                combatant.id = new_combatant_id();
                seen.insert(combatant.id.clone());
            }
            combatant.clamp();
        }
        self.clamp_active();
    }

    fn clamp_active(&mut self) {
        if self.active_idx >= self.party.len() {
            self.active_idx = self.party.len().saturating_sub(1);
        }
    }

    /// Appends a fresh combatant and returns its id.
    pub fn add_combatant(&mut self, visible: bool) -> String {
        let mut combatant = Combatant::new(if visible { NEW_NAME } else { NEW_HIDDEN_NAME });
        combatant.visible = visible;
        let id = combatant.id.clone();
        self.party.push(combatant);
        id
    }

    /// Inserts a copy of the combatant at `idx` right after it, under a new id.
    pub fn duplicate_at(&mut self, idx: usize) -> Option<String> {
        let mut copy = self.party.get(idx)?.clone();
        copy.id = new_combatant_id();
        let id = copy.id.clone();
        let shift = self.active_idx > idx && self.active_idx < self.party.len();
        self.party.insert(idx + 1, copy);
        if shift {
            self.active_idx += 1;
        }
        Some(id)
    }

    pub fn remove_at(&mut self, idx: usize) -> Option<Combatant> {
        if idx >= self.party.len() {
            return None;
        }
        let removed = self.party.remove(idx);
        if idx < self.active_idx {
            self.active_idx -= 1;
        }
        self.clamp_active();
        Some(removed)
    }

    /// Highest initiative first, ties by name (case-insensitive). The active
    /// combatant stays active by id.
    pub fn sort_by_initiative(&mut self) {
        let active_id = self.active().map(|c| c.id.clone());
        self.party.sort_by(|a, b| match b.ini.cmp(&a.ini) {
            Ordering::Equal => a.nombre.to_lowercase().cmp(&b.nombre.to_lowercase()),
            other => other,
        });
        self.active_idx = active_id
            .and_then(|id| self.position(&id))
            .unwrap_or(0);
    }

    pub fn next_visible(&self, from: usize) -> Option<usize> {
        let n = self.party.len();
        if n == 0 {
            return None;
        }
        let start = from % n;
        (1..=n)
            .map(|k| (start + k) % n)
            .find(|&j| self.party[j].visible)
    }

    pub fn prev_visible(&self, from: usize) -> Option<usize> {
        let n = self.party.len();
        if n == 0 {
            return None;
        }
        let start = from % n;
        (1..=n)
            .map(|k| (start + n - k % n) % n)
            .find(|&j| self.party[j].visible)
    }

    /// Ignored (returns `false`) when `idx` is not a row of the party.
    pub fn set_active(&mut self, idx: usize, reset: bool) -> bool {
        let Some(combatant) = self.party.get_mut(idx) else {
            return false;
        };
        if reset {
            combatant.reset_for_turn();
        }
        self.active_idx = idx;
        true
    }

    /// Moves to the next visible combatant and refreshes its turn.
    pub fn advance(&mut self) -> Option<usize> {
        let next = self.next_visible(self.active_idx)?;
        self.set_active(next, true);
        Some(next)
    }

    /// Moves back to the previous visible combatant without resetting it.
    pub fn retreat(&mut self) -> Option<usize> {
        let prev = self.prev_visible(self.active_idx)?;
        self.set_active(prev, false);
        Some(prev)
    }

    pub fn reset_round(&mut self) {
        self.party.iter_mut().for_each(Combatant::reset_for_turn);
    }

    pub fn visible_party(&self) -> Vec<VisibleRow<'_>> {
        let active_id = self.active().map(|c| c.id.as_str());
        self.party
            .iter()
            .enumerate()
            .filter(|(_, c)| c.visible)
            .map(|(index, combatant)| VisibleRow {
                index,
                combatant,
                active: Some(combatant.id.as_str()) == active_id,
            })
            .collect()
    }
}
