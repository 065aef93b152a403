//! Amounts in Arabic words ("tafqeet") for printed vouchers and cheques.

use rust_decimal::{prelude::ToPrimitive, Decimal};
use serde::{Deserialize, Serialize};

const ONES: [&str; 10] = ["", "واحد", "اثنان", "ثلاثة", "أربعة", "خمسة", "ستة", "سبعة", "ثمانية", "تسعة"];
const TENS: [&str; 10] = ["", "عشرة", "عشرون", "ثلاثون", "أربعون", "خمسون", "ستون", "سبعون", "ثمانون", "تسعون"];
const TEENS: [&str; 10] = [
    "عشرة",
    "أحد عشر",
    "اثنا عشر",
    "ثلاثة عشر",
    "أربعة عشر",
    "خمسة عشر",
    "ستة عشر",
    "سبعة عشر",
    "ثمانية عشر",
    "تسعة عشر",
];
const HUNDREDS: [&str; 10] = [
    "",
    "مائة",
    "مائتان",
    "ثلاثمائة",
    "أربعمائة",
    "خمسمائة",
    "ستمائة",
    "سبعمائة",
    "ثمانمائة",
    "تسعمائة",
];

const ZERO: &str = "صفر";
const SUFFIX: &str = " فقط لا غير";

/// Singular, dual and plural (3 to 10) forms of a scale word.
struct Scale {
    value: u64,
    one: &'static str,
    two: &'static str,
    few: &'static str,
    many: &'static str,
}

const SCALES: [Scale; 3] = [
    Scale { value: 1_000_000_000, one: "مليار", two: "ملياران", few: "مليارات", many: "مليار" },
    Scale { value: 1_000_000, one: "مليون", two: "مليونان", few: "ملايين", many: "مليون" },
    Scale { value: 1_000, one: "ألف", two: "ألفان", few: "آلاف", many: "ألف" },
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    #[default]
    Egp,
    Usd,
    Eur,
    Sar,
}

impl Currency {
    /// Unknown codes fall back to Egyptian pounds.
    pub fn from_code(code: &str) -> Self {
        match code.trim().to_ascii_uppercase().as_str() {
            "USD" => Currency::Usd,
            "EUR" => Currency::Eur,
            "SAR" => Currency::Sar,
            _ => Currency::Egp,
        }
    }

    fn names(&self) -> (&'static str, &'static str) {
        match self {
            Currency::Egp => ("جنيه", "قرش"),
            Currency::Usd => ("دولار", "سنت"),
            Currency::Eur => ("يورو", "سنت"),
            Currency::Sar => ("ريال", "هللة"),
        }
    }
}

/// 1 to 999 in words; empty for 0.
fn group(n: u64) -> String {
    match n {
        0 => String::new(),
        1..=9 => ONES[n as usize].to_string(),
        10..=19 => TEENS[(n - 10) as usize].to_string(),
        20..=99 => {
            let rem = n % 10;
            if rem > 0 {
                format!("{} و{}", ONES[rem as usize], TENS[(n / 10) as usize])
            } else {
                TENS[(n / 10) as usize].to_string()
            }
        }
        _ => {
            let rem = n % 100;
            let head = HUNDREDS[((n / 100) % 10) as usize];
            if rem > 0 {
                format!("{} و{}", head, group(rem))
            } else {
                head.to_string()
            }
        }
    }
}

fn scaled(count: u64, scale: &Scale) -> String {
    match count {
        1 => scale.one.to_string(),
        2 => scale.two.to_string(),
        3..=9 => format!("{} {}", ONES[count as usize], scale.few),
        10 => format!("{} {}", TENS[1], scale.few),
        _ => format!("{} {}", integer_words(count), scale.many),
    }
}

fn integer_words(n: u64) -> String {
    let mut parts = Vec::new();
    let mut rest = n;
    for scale in &SCALES {
        let count = rest / scale.value;
        if count > 0 {
            parts.push(scaled(count, scale));
            rest %= scale.value;
        }
    }
    if rest > 0 {
        parts.push(group(rest));
    }
    parts.join(" و")
}

/// Writes `amount` in Arabic words with the currency and its fraction, e.g.
/// `150.5` EGP becomes "مائة وخمسون جنيه وخمسون قرش فقط لا غير". Fractions
/// beyond two places are truncated and the sign is ignored.
pub fn tafqeet(amount: Decimal, currency: Currency) -> String {
    let amount = amount.abs();
    if amount.is_zero() {
        return ZERO.to_string();
    }
    let integer = amount.trunc().to_u64().unwrap_or(u64::MAX);
    let fraction = ((amount.fract() * Decimal::ONE_HUNDRED).trunc())
        .to_u64()
        .unwrap_or(0);

    let (name, sub_name) = currency.names();
    let mut text = if integer > 0 {
        format!("{} {}", integer_words(integer), name)
    } else {
        String::new()
    };
    if fraction > 0 {
        if !text.is_empty() {
            text.push_str(" و");
        }
        text.push_str(&group(fraction));
        text.push(' ');
        text.push_str(sub_name);
    }
    text.push_str(SUFFIX);
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn zero() {
        assert_eq!(tafqeet(Decimal::ZERO, Currency::Egp), "صفر");
    }

    #[test]
    fn small_amounts() {
        assert_eq!(tafqeet(dec!(5), Currency::Egp), "خمسة جنيه فقط لا غير");
        assert_eq!(tafqeet(dec!(15), Currency::Usd), "خمسة عشر دولار فقط لا غير");
        assert_eq!(tafqeet(dec!(21), Currency::Egp), "واحد وعشرون جنيه فقط لا غير");
        assert_eq!(tafqeet(dec!(300), Currency::Sar), "ثلاثمائة ريال فقط لا غير");
    }

    #[test]
    fn fractions() {
        assert_eq!(
            tafqeet(dec!(150.5), Currency::Egp),
            "مائة وخمسون جنيه وخمسون قرش فقط لا غير"
        );
        assert_eq!(tafqeet(dec!(0.25), Currency::Eur), "خمسة وعشرون سنت فقط لا غير");
        assert_eq!(tafqeet(dec!(1.999), Currency::Egp), "واحد جنيه وتسعة وتسعون قرش فقط لا غير");
    }

    #[test]
    fn thousands_and_millions() {
        assert_eq!(tafqeet(dec!(1000), Currency::Egp), "ألف جنيه فقط لا غير");
        assert_eq!(tafqeet(dec!(2500), Currency::Egp), "ألفان وخمسمائة جنيه فقط لا غير");
        assert_eq!(tafqeet(dec!(7000), Currency::Egp), "سبعة آلاف جنيه فقط لا غير");
        assert_eq!(tafqeet(dec!(10000), Currency::Egp), "عشرة آلاف جنيه فقط لا غير");
        assert_eq!(tafqeet(dec!(25000), Currency::Egp), "خمسة وعشرون ألف جنيه فقط لا غير");
        assert_eq!(
            tafqeet(dec!(3001001), Currency::Egp),
            "ثلاثة ملايين وألف وواحد جنيه فقط لا غير"
        );
    }

    #[test]
    fn currency_codes() {
        assert_eq!(Currency::from_code("usd"), Currency::Usd);
        assert_eq!(Currency::from_code("GBP"), Currency::Egp);
    }
}
