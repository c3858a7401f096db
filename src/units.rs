//! Unit conversion between connected variables.
//!
//! A connection between variables declared in different units scales the derivative by
//! the linear part of the conversion, `convert(1, from, to) - convert(0, from, to)`.
//! Offsets (as between degrees Celsius and kelvin) cancel in that difference.
//!
//! [`UnitTable`] is the default converter. Its standard units take their scale from the
//! [uom](https://docs.rs/uom) unit definitions, and it parses compound units such as
//! `kg*m/s**2` or `m/s^2`. Each unit is stored as a dimension exponent vector plus a factor
//! (and offset) to the SI base unit of that dimension, which is what compound parsing needs
//! at run time.

use std::collections::HashMap;
use std::fmt;

use crate::errors::UnitError;

/// Converts scalar values between units.
pub trait UnitConverter {
    /// Converts `value` expressed in `from` into `to`.
    fn convert(&self, value: f64, from: &str, to: &str) -> Result<f64, UnitError>;

    /// Factor by which a derivative scales across the conversion.
    fn derivative_factor(&self, from: &str, to: &str) -> Result<f64, UnitError> {
        Ok(self.convert(1.0, from, to)? - self.convert(0.0, from, to)?)
    }
}

const N_BASE: usize = 7;
const BASE_SYMBOLS: [&str; N_BASE] = ["L", "M", "T", "I", "Θ", "N", "A"];

/// Exponents over length, mass, time, current, temperature, amount and angle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Dimension([i8; N_BASE]);

impl Dimension {
    pub const DIMENSIONLESS: Dimension = Dimension([0; N_BASE]);

    const fn base(index: usize) -> Self {
        let mut exponents = [0; N_BASE];
        exponents[index] = 1;
        Dimension(exponents)
    }

    pub const LENGTH: Dimension = Dimension::base(0);
    pub const MASS: Dimension = Dimension::base(1);
    pub const TIME: Dimension = Dimension::base(2);
    pub const CURRENT: Dimension = Dimension::base(3);
    pub const TEMPERATURE: Dimension = Dimension::base(4);
    pub const AMOUNT: Dimension = Dimension::base(5);
    pub const ANGLE: Dimension = Dimension::base(6);

    pub fn mul(self, other: Dimension) -> Dimension {
        let mut exponents = self.0;
        for (e, o) in exponents.iter_mut().zip(other.0) {
            *e += o;
        }
        Dimension(exponents)
    }

    pub fn pow(self, n: i8) -> Dimension {
        Dimension(self.0.map(|e| e * n))
    }

    pub fn inverse(self) -> Dimension {
        self.pow(-1)
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .0
            .iter()
            .zip(BASE_SYMBOLS)
            .filter(|(e, _)| **e != 0)
            .map(|(e, symbol)| match e {
                1 => symbol.to_string(),
                _ => format!("{symbol}^{e}"),
            })
            .collect();
        if parts.is_empty() {
            write!(f, "1")
        } else {
            write!(f, "{}", parts.join("·"))
        }
    }
}

/// A unit: `base = value * factor + offset`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Unit {
    pub dimension: Dimension,
    pub factor: f64,
    pub offset: f64,
}

impl Unit {
    pub fn new(dimension: Dimension, factor: f64) -> Self {
        Self {
            dimension,
            factor,
            offset: 0.0,
        }
    }

    pub fn with_offset(mut self, offset: f64) -> Self {
        self.offset = offset;
        self
    }

    fn to_base(&self, value: f64) -> f64 {
        value * self.factor + self.offset
    }

    fn from_base(&self, value: f64) -> f64 {
        (value - self.offset) / self.factor
    }
}

/// Registers `$symbol` as `$unit` of the uom quantity `$quantity`, scaled to `$base`.
macro_rules! register_si {
    ($table:ident, $dimension:expr, $quantity:ident => $base:ident { $($symbol:literal: $unit:ident),+ $(,)? }) => {
        $(
            $table.register(
                $symbol,
                Unit::new($dimension, $quantity::new::<$unit>(1.0).get::<$base>()),
            );
        )+
    };
}

/// Registry of named units.
#[derive(Debug, Clone, Default)]
pub struct UnitTable {
    units: HashMap<String, Unit>,
}

impl UnitTable {
    /// An empty table. Only the dimensionless unit `1` parses.
    pub fn new() -> Self {
        Self::default()
    }

    /// A table with SI units, common prefixes and a few imperial units.
    ///
    /// Factors and offsets come from the unit definitions of `uom`; the table only names
    /// each unit and records its dimension for compound parsing.
    pub fn standard() -> Self {
        use uom::si::f64::{
            AmountOfSubstance, Angle, ElectricCurrent, Energy, Force, Length, Mass, Power, Pressure,
            ThermodynamicTemperature, Time, Volume,
        };
        use uom::si::{
            amount_of_substance::mole,
            angle::{degree, radian},
            electric_current::ampere,
            energy::{joule, kilojoule},
            force::{kilonewton, newton, pound_force},
            length::{centimeter, foot, inch, kilometer, meter, mile, millimeter},
            mass::{gram, kilogram, megagram, pound},
            power::{kilowatt, watt},
            pressure::{bar, kilopascal, pascal},
            thermodynamic_temperature::{degree_celsius, degree_fahrenheit, degree_rankine, kelvin},
            time::{hour, millisecond, minute, second},
            volume::{cubic_meter, liter},
        };

        let force = Dimension::MASS
            .mul(Dimension::LENGTH)
            .mul(Dimension::TIME.pow(-2));
        let pressure = force.mul(Dimension::LENGTH.pow(-2));
        let energy = force.mul(Dimension::LENGTH);
        let power = energy.mul(Dimension::TIME.inverse());

        let mut table = Self::new();
        register_si!(table, Dimension::LENGTH, Length => meter {
            "m": meter, "km": kilometer, "cm": centimeter, "mm": millimeter,
            "inch": inch, "ft": foot, "mi": mile,
        });
        register_si!(table, Dimension::MASS, Mass => kilogram {
            "kg": kilogram, "g": gram, "t": megagram, "lb": pound,
        });
        register_si!(table, Dimension::TIME, Time => second {
            "s": second, "ms": millisecond, "min": minute, "h": hour,
        });
        register_si!(table, Dimension::CURRENT, ElectricCurrent => ampere { "A": ampere });
        register_si!(table, Dimension::AMOUNT, AmountOfSubstance => mole { "mol": mole });
        register_si!(table, Dimension::ANGLE, Angle => radian { "rad": radian, "deg": degree });
        register_si!(table, force, Force => newton {
            "N": newton, "kN": kilonewton, "lbf": pound_force,
        });
        register_si!(table, pressure, Pressure => pascal {
            "Pa": pascal, "kPa": kilopascal, "bar": bar,
        });
        register_si!(table, energy, Energy => joule { "J": joule, "kJ": kilojoule });
        register_si!(table, power, Power => watt { "W": watt, "kW": kilowatt });
        register_si!(table, Dimension::LENGTH.pow(3), Volume => cubic_meter { "L": liter });

        // Temperatures carry an offset to kelvin.
        let temperature = |zero: ThermodynamicTemperature, one: ThermodynamicTemperature| {
            let offset = zero.get::<kelvin>();
            Unit::new(Dimension::TEMPERATURE, one.get::<kelvin>() - offset).with_offset(offset)
        };
        macro_rules! register_temperature {
            ($($symbol:literal: $unit:ident),+) => {
                $(
                    table.register(
                        $symbol,
                        temperature(
                            ThermodynamicTemperature::new::<$unit>(0.0),
                            ThermodynamicTemperature::new::<$unit>(1.0),
                        ),
                    );
                )+
            };
        }
        register_temperature!(
            "K": kelvin,
            "degK": kelvin,
            "degC": degree_celsius,
            "degF": degree_fahrenheit,
            "degR": degree_rankine
        );

        table
    }

    pub fn register(&mut self, symbol: &str, unit: Unit) {
        self.units.insert(symbol.to_string(), unit);
    }

    /// Parses a possibly compound unit string.
    ///
    /// Grammar: factors separated by `*` or `/`, each factor a symbol optionally raised
    /// to an integer power with `**n` or `^n`. Offsets only survive for a single bare symbol.
    pub fn parse(&self, text: &str) -> Result<Unit, UnitError> {
        let unknown = || UnitError::UnknownUnit(text.to_string());
        let normalized = text.replace("**", "^").replace(' ', "");
        if normalized.is_empty() || normalized == "1" {
            return Ok(Unit::new(Dimension::DIMENSIONLESS, 1.0));
        }
        if let Some(unit) = self.units.get(&normalized) {
            return Ok(*unit);
        }

        let mut result = Unit::new(Dimension::DIMENSIONLESS, 1.0);
        let mut divide = false;
        let mut start = 0;
        let bytes = normalized.as_bytes();
        for end in 0..=bytes.len() {
            if end < bytes.len() && bytes[end] != b'*' && bytes[end] != b'/' {
                continue;
            }
            let factor = self.parse_factor(&normalized[start..end]).ok_or_else(unknown)?;
            let (dimension, scale) = if divide {
                (factor.dimension.inverse(), 1.0 / factor.factor)
            } else {
                (factor.dimension, factor.factor)
            };
            result.dimension = result.dimension.mul(dimension);
            result.factor *= scale;
            if end < bytes.len() {
                divide = bytes[end] == b'/';
            }
            start = end + 1;
        }
        Ok(result)
    }

    fn parse_factor(&self, text: &str) -> Option<Unit> {
        let (symbol, power) = match text.split_once('^') {
            Some((symbol, power)) => (symbol, power.parse::<i8>().ok()?),
            None => (text, 1),
        };
        let unit = match symbol {
            "1" => Unit::new(Dimension::DIMENSIONLESS, 1.0),
            _ => *self.units.get(symbol)?,
        };
        Some(Unit::new(unit.dimension.pow(power), unit.factor.powi(power as i32)))
    }
}

impl UnitConverter for UnitTable {
    fn convert(&self, value: f64, from: &str, to: &str) -> Result<f64, UnitError> {
        if from == to {
            return Ok(value);
        }
        let source = self.parse(from)?;
        let target = self.parse(to)?;
        if source.dimension != target.dimension {
            return Err(UnitError::Incompatible {
                from: format!("{from} [{}]", source.dimension),
                to: format!("{to} [{}]", target.dimension),
            });
        }
        Ok(target.from_base(source.to_base(value)))
    }
}
