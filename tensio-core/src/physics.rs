//! # String Physics Module
//!
//! Pure, stateless functions mapping string material, gauge, and racket
//! geometry plus a measured frequency into a tension estimate via the
//! transverse wave equation `T = μ·(2Lf)²`.
//!
//! ## Features
//! - Solid-cylinder linear density from gauge and bulk material density
//! - Reference string table with gauge interpolation and clamping
//! - Head-size based vibrating length model with grommet inset correction
//! - Cross-string mass-loading correction calibrated against the
//!   reference device

use std::io;

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Reference weave pattern the cross-loading calibration is anchored to
/// (a 16x19 pattern has multiplier exactly 1.0).
pub const REFERENCE_CROSS_COUNT: u32 = 19;
/// Extra effective density per cross string relative to the reference
/// pattern. Calibrated against reference-device measurements, not derived
/// from first principles.
pub const CROSS_LOAD_PER_STRING: f32 = 0.0015;
/// Fixed major:minor axis ratio of the head ellipse model.
pub const HEAD_ASPECT_RATIO: f32 = 1.45;
/// Grommets sit inboard of the frame; the full major axis is shortened by
/// this factor to get the vibrating length.
pub const GROMMET_INSET: f32 = 0.96;

const SQ_IN_TO_SQ_M: f32 = 0.000_645_16;
const NEWTONS_TO_POUNDS: f32 = 0.224_809;

/// Material density class of a string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StringMaterial {
    Polyester,
    Nylon,
    NaturalGut,
    Kevlar,
}

impl StringMaterial {
    /// Bulk density of the solid material in kg/m³, used by the
    /// solid-cylinder fallback when a string is not in the table.
    pub fn bulk_density(self) -> f32 {
        match self {
            StringMaterial::Polyester => 1380.0,
            StringMaterial::Nylon => 1140.0,
            StringMaterial::NaturalGut => 1290.0,
            StringMaterial::Kevlar => 1440.0,
        }
    }
}

/// Everything known about the string bed of one measurement session.
/// Immutable once the session starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StringProfile {
    pub material: StringMaterial,
    /// String diameter in millimeters.
    pub gauge_mm: f32,
    /// Head size in square inches, used to model the vibrating length.
    pub head_area_sq_in: f32,
    /// Directly measured vibrating length in meters. Always overrides the
    /// head-size model when present.
    pub measured_length_m: Option<f32>,
    /// Main strings in the weave pattern.
    pub mains: u32,
    /// Cross strings in the weave pattern.
    pub crosses: u32,
}

impl StringProfile {
    /// Vibrating length for this profile: the measured length when
    /// supplied, otherwise the head-size ellipse model.
    pub fn vibrating_length_m(&self) -> f32 {
        self.measured_length_m
            .unwrap_or_else(|| vibrating_length(self.head_area_sq_in))
    }

    /// Linear density of the main string including the cross-string
    /// mass-loading correction.
    pub fn effective_linear_density(&self, table: &StringTable) -> f32 {
        table.linear_density(self.material, self.gauge_mm) * cross_loading_factor(self.crosses)
    }

    /// Tension of the string bed when the mains vibrate at `frequency_hz`.
    pub fn tension_at(&self, frequency_hz: f32, table: &StringTable) -> TensionResult {
        tension(
            frequency_hz,
            self.vibrating_length_m(),
            self.effective_linear_density(table),
        )
    }
}

/// A computed tension, never mutated once produced.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TensionResult {
    pub newtons: f32,
    pub pounds: f32,
}

/// Linear mass density of a solid cylindrical string in kg/m:
/// `π·(d/2/1000)²·ρ`.
pub fn linear_density(diameter_mm: f32, material_density_kg_m3: f32) -> f32 {
    let radius_m = diameter_mm / 2.0 / 1000.0;
    std::f32::consts::PI * radius_m * radius_m * material_density_kg_m3
}

/// Mass-loading multiplier for the cross strings woven through the mains.
///
/// Each main/cross intersection couples a small amount of cross-string
/// mass into the vibrating main. Modeled as a linear correction of +0.15%
/// effective density per cross string relative to the 19-cross reference
/// pattern, so `cross_loading_factor(19) == 1.0` exactly.
pub fn cross_loading_factor(cross_count: u32) -> f32 {
    1.0 + (cross_count as f32 - REFERENCE_CROSS_COUNT as f32) * CROSS_LOAD_PER_STRING
}

/// Vibrating main-string length in meters estimated from head size.
///
/// The head is modeled as an ellipse with a fixed 1.45:1 major:minor
/// ratio. The semi-major axis follows from the area, is doubled for the
/// full axis, then shortened by the grommet inset.
pub fn vibrating_length(head_area_sq_in: f32) -> f32 {
    let area_sq_m = head_area_sq_in * SQ_IN_TO_SQ_M;
    // A = π·a·b with a/b fixed, so a = sqrt(A·ratio/π).
    let semi_major = (area_sq_m * HEAD_ASPECT_RATIO / std::f32::consts::PI).sqrt();
    2.0 * semi_major * GROMMET_INSET
}

/// Tension via the transverse wave equation `T = μ·(2Lf)²`.
///
/// Both values are rounded to two decimal places for display stability.
pub fn tension(frequency_hz: f32, length_m: f32, linear_density_kg_per_m: f32) -> TensionResult {
    let speed = 2.0 * length_m * frequency_hz;
    let newtons = linear_density_kg_per_m * speed * speed;
    TensionResult {
        newtons: round2(newtons),
        pounds: round2(newtons * NEWTONS_TO_POUNDS),
    }
}

/// Inverse of [`tension`]: the fundamental frequency a string bed at
/// `newtons` would ring at. Useful for hosts that show a target pitch for
/// a requested tension.
pub fn frequency_for_tension(newtons: f32, length_m: f32, linear_density_kg_per_m: f32) -> f32 {
    (newtons / linear_density_kg_per_m).sqrt() / (2.0 * length_m)
}

fn round2(value: f32) -> f32 {
    (value * 100.0).round() / 100.0
}

/// One tabulated string: a manufacturer gauge with its measured linear
/// density.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StringTableEntry {
    pub material: StringMaterial,
    pub gauge_mm: f32,
    pub kg_per_m: f32,
}

/// Immutable reference table of measured string linear densities.
///
/// Lookup precedence: exact material+gauge match, then linear
/// interpolation between the two neighboring tabulated gauges, then
/// clamping to the nearest tabulated endpoint. Only a material absent
/// from the table entirely falls back to the solid-cylinder estimate.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StringTable {
    entries: Vec<StringTableEntry>,
}

impl StringTable {
    pub fn new(mut entries: Vec<StringTableEntry>) -> Self {
        entries.sort_by(|a, b| {
            (a.material, a.gauge_mm)
                .partial_cmp(&(b.material, b.gauge_mm))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        Self { entries }
    }

    /// Loads a custom table from JSON, e.g. a host-provided string
    /// database export.
    pub fn from_json_reader<R: io::Read>(reader: R) -> Result<Self> {
        let entries: Vec<StringTableEntry> =
            serde_json::from_reader(reader).context("failed to parse string table JSON")?;
        Ok(Self::new(entries))
    }

    pub fn entries(&self) -> &[StringTableEntry] {
        &self.entries
    }

    /// Linear density in kg/m for a material and gauge, following the
    /// table lookup precedence described on [`StringTable`].
    pub fn linear_density(&self, material: StringMaterial, gauge_mm: f32) -> f32 {
        let tabulated: Vec<&StringTableEntry> = self
            .entries
            .iter()
            .filter(|e| e.material == material)
            .collect();

        if tabulated.is_empty() {
            return linear_density(gauge_mm, material.bulk_density());
        }

        // Exact match wins.
        if let Some(entry) = tabulated
            .iter()
            .find(|e| (e.gauge_mm - gauge_mm).abs() < 1e-4)
        {
            return entry.kg_per_m;
        }

        // Entries are sorted by gauge within a material. Outside the
        // tabulated range: clamp to the nearest endpoint.
        let first = tabulated[0];
        let last = tabulated[tabulated.len() - 1];
        if gauge_mm <= first.gauge_mm {
            return first.kg_per_m;
        }
        if gauge_mm >= last.gauge_mm {
            return last.kg_per_m;
        }

        // Between two tabulated gauges: linear interpolation.
        for pair in tabulated.windows(2) {
            let (below, above) = (pair[0], pair[1]);
            if gauge_mm > below.gauge_mm && gauge_mm < above.gauge_mm {
                let t = (gauge_mm - below.gauge_mm) / (above.gauge_mm - below.gauge_mm);
                return below.kg_per_m + t * (above.kg_per_m - below.kg_per_m);
            }
        }

        // Unreachable with sorted entries; keep the cylinder estimate as a
        // final answer rather than panicking on a malformed table.
        linear_density(gauge_mm, material.bulk_density())
    }
}

// Ord is needed for the sort key; gauge ties are fine to leave in input
// order.
impl PartialOrd for StringMaterial {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for StringMaterial {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (*self as u8).cmp(&(*other as u8))
    }
}

/// Built-in reference table, computed once at startup.
///
/// Densities are measured values from the reference device's string
/// database; for solid monofilaments they land close to the cylinder
/// estimate, while gut and multifilament constructions deviate from it.
pub static REFERENCE_TABLE: Lazy<StringTable> = Lazy::new(|| {
    use StringMaterial::*;
    let entries = vec![
        (Polyester, 1.10, 0.001311),
        (Polyester, 1.20, 0.001561),
        (Polyester, 1.25, 0.001694),
        (Polyester, 1.30, 0.001832),
        (Polyester, 1.35, 0.001976),
        (Nylon, 1.25, 0.001424),
        (Nylon, 1.30, 0.001540),
        (Nylon, 1.35, 0.001661),
        (NaturalGut, 1.25, 0.001640),
        (NaturalGut, 1.30, 0.001774),
        (Kevlar, 1.20, 0.001680),
        (Kevlar, 1.30, 0.001972),
    ];
    StringTable::new(
        entries
            .into_iter()
            .map(|(material, gauge_mm, kg_per_m)| StringTableEntry {
                material,
                gauge_mm,
                kg_per_m,
            })
            .collect(),
    )
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solid_cylinder_linear_density() {
        // 1.25 mm polyester at 1380 kg/m³.
        let mu = linear_density(1.25, 1380.0);
        assert!((mu - 0.001694).abs() < 1e-5, "mu = {mu}");
    }

    #[test]
    fn cross_loading_is_monotonic_and_anchored() {
        assert_eq!(cross_loading_factor(19), 1.0);
        let mut previous = cross_loading_factor(14);
        for crosses in 15..=24 {
            let factor = cross_loading_factor(crosses);
            assert!(factor > previous, "factor must increase with crosses");
            previous = factor;
        }
    }

    #[test]
    fn measured_length_overrides_head_model() {
        let profile = StringProfile {
            material: StringMaterial::Polyester,
            gauge_mm: 1.25,
            head_area_sq_in: 100.0,
            measured_length_m: Some(0.31),
            mains: 16,
            crosses: 19,
        };
        assert_eq!(profile.vibrating_length_m(), 0.31);
    }

    #[test]
    fn physics_round_trip() {
        // frequency -> tension -> frequency must agree under T = μ(2Lf)².
        let mu = 0.001694;
        let length = 0.33;
        let target_newtons = 120.0;
        let frequency = frequency_for_tension(target_newtons, length, mu);
        let result = tension(frequency, length, mu);
        assert!(
            (result.newtons - target_newtons).abs() < 0.01,
            "recovered {} N",
            result.newtons
        );
    }

    #[test]
    fn reference_scenario_polyester_sixteen_nineteen() {
        // Polyester 1.25 mm, 100 sq in head, 16x19, plucked at 420 Hz.
        let profile = StringProfile {
            material: StringMaterial::Polyester,
            gauge_mm: 1.25,
            head_area_sq_in: 100.0,
            measured_length_m: None,
            mains: 16,
            crosses: 19,
        };
        let mu = profile.effective_linear_density(&REFERENCE_TABLE);
        assert!((mu - 0.001694).abs() < 1e-5, "mu = {mu}");

        let length = profile.vibrating_length_m();
        assert!((length - 0.3313).abs() < 1e-3, "length = {length}");

        let result = profile.tension_at(420.0, &REFERENCE_TABLE);
        assert!(
            (result.pounds - 30.0).abs() < 1.0,
            "tension = {} lbs",
            result.pounds
        );
    }

    #[test]
    fn table_lookup_precedence() {
        let table = &REFERENCE_TABLE;

        // Exact match.
        let exact = table.linear_density(StringMaterial::Polyester, 1.25);
        assert_eq!(exact, 0.001694);

        // Interpolation halfway between 1.20 and 1.25.
        let mid = table.linear_density(StringMaterial::Polyester, 1.225);
        let expected = (0.001561 + 0.001694) / 2.0;
        assert!((mid - expected).abs() < 1e-6, "mid = {mid}");

        // Clamping outside the tabulated range.
        assert_eq!(
            table.linear_density(StringMaterial::Polyester, 0.90),
            0.001311
        );
        assert_eq!(
            table.linear_density(StringMaterial::Polyester, 1.60),
            0.001976
        );
    }

    #[test]
    fn untabulated_material_falls_back_to_cylinder() {
        let table = StringTable::default();
        let mu = table.linear_density(StringMaterial::Kevlar, 1.30);
        let cylinder = linear_density(1.30, StringMaterial::Kevlar.bulk_density());
        assert_eq!(mu, cylinder);
    }

    #[test]
    fn table_loads_from_json() {
        let json = r#"[
            { "material": "Polyester", "gauge_mm": 1.25, "kg_per_m": 0.0017 }
        ]"#;
        let table = StringTable::from_json_reader(json.as_bytes()).unwrap();
        assert_eq!(table.linear_density(StringMaterial::Polyester, 1.25), 0.0017);
    }
}
