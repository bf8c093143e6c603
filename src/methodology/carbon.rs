//! Conversion of generated electricity into avoided CO2.
//!
//! A biogas generator burns methane that would otherwise be vented. One ton of CH4 has
//! the warming potential of [`CH4_CO2_GWP`] tons of CO2, so the credit for one MWh is the
//! methane needed to generate it times that factor.

/// 100-year global warming potential of methane relative to CO2.
pub const CH4_CO2_GWP: f64 = 28.0;
/// Internal combustion engine efficiency.
pub const ENGINE_EFFICIENCY: f64 = 0.35;
pub const GENERATOR_EFFICIENCY: f64 = 0.90;

/// Combustion enthalpy of methane, kJ/mol.
const CH4_KJ_PER_MOLE: f64 = 890.8;
const CH4_GRAMS_PER_MOLE: f64 = 16.0;

/// Tons of CO2 per MWh, from the combustion enthalpy of methane (≈ 5.7476).
pub fn mwh_to_ton_co2() -> f64 {
    let moles_per_ton = 1e6 / CH4_GRAMS_PER_MOLE;
    let kj_per_ton = moles_per_ton * CH4_KJ_PER_MOLE;
    let kwh_per_ton = kj_per_ton / 3600.0 * ENGINE_EFFICIENCY * GENERATOR_EFFICIENCY;
    1000.0 * CH4_CO2_GWP / kwh_per_ton
}

/// Tons of CO2 per MWh, from the calorific value of biogas (≈ 7.4074).
pub fn mwh_to_ton_co2_calorific() -> f64 {
    const CALORIFIC_MJ_PER_M3: f64 = 21.6;
    const M3_PER_TON_BIOGAS: f64 = 1200.0;
    const CH4_CONCENTRATION: f64 = 0.6;

    let generated_mj =
        CALORIFIC_MJ_PER_M3 * M3_PER_TON_BIOGAS * ENGINE_EFFICIENCY * GENERATOR_EFFICIENCY;
    let generated_mwh = generated_mj / 3600.0;
    CH4_CONCENTRATION / generated_mwh * CH4_CO2_GWP
}
