//! Pre-synthesis text normalization.
//!
//! Synthesizers read symbols inconsistently, so text is rewritten into its
//! spoken form before it reaches the TTS adapter. The pass is pluggable: the
//! turn controller holds an `Arc<dyn TextNormalizer>` and never bakes a rule
//! into an adapter.

/// Rewrites reply text before synthesis.
pub trait TextNormalizer: Send + Sync {
    fn normalize(&self, text: &str) -> String;
}

/// Leaves text untouched.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassThrough;

impl TextNormalizer for PassThrough {
    fn normalize(&self, text: &str) -> String {
        text.to_string()
    }
}

/// Spells out currency amounts and percentages.
///
/// `$1,250.50` becomes "one thousand two hundred fifty dollars and fifty
/// cents"; `3.5%` becomes "three point five percent". Everything else passes
/// through unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct SpokenForm;

impl TextNormalizer for SpokenForm {
    fn normalize(&self, text: &str) -> String {
        let chars: Vec<char> = text.chars().collect();
        let mut out = String::with_capacity(text.len());
        let mut i = 0;

        while i < chars.len() {
            let c = chars[i];
            if c == '$' && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit()) {
                if let Some((amount, next)) = read_amount(&chars, i + 1) {
                    out.push_str(&currency_words(&amount));
                    i = next;
                    continue;
                }
            }
            let starts_number = i == 0 || !chars[i - 1].is_alphanumeric();
            if c.is_ascii_digit() && starts_number {
                if let Some((amount, next)) = read_amount(&chars, i) {
                    if chars.get(next) == Some(&'%') {
                        out.push_str(&percent_words(&amount));
                        i = next + 1;
                        continue;
                    }
                }
            }
            out.push(c);
            i += 1;
        }
        out
    }
}

struct Amount {
    whole: u64,
    fraction: String,
}

/// Reads `1,234.56`-style digits starting at `start`.
fn read_amount(chars: &[char], start: usize) -> Option<(Amount, usize)> {
    let mut digits = String::new();
    let mut i = start;
    while i < chars.len() {
        let c = chars[i];
        if c.is_ascii_digit() {
            digits.push(c);
        } else if c == ',' && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit()) {
            // thousands separator
        } else {
            break;
        }
        i += 1;
    }
    let whole = digits.parse::<u64>().ok()?;

    let mut fraction = String::new();
    if chars.get(i) == Some(&'.') && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit()) {
        i += 1;
        while let Some(c) = chars.get(i).filter(|c| c.is_ascii_digit()) {
            fraction.push(*c);
            i += 1;
        }
    }
    Some((Amount { whole, fraction }, i))
}

fn currency_words(amount: &Amount) -> String {
    let cents = match amount.fraction.len() {
        0 => 0,
        1 => amount.fraction.parse::<u64>().unwrap_or(0) * 10,
        _ => amount.fraction[..2].parse::<u64>().unwrap_or(0),
    };
    let dollars = format!(
        "{} {}",
        number_to_words(amount.whole),
        if amount.whole == 1 { "dollar" } else { "dollars" }
    );
    let cents_words = format!(
        "{} {}",
        number_to_words(cents),
        if cents == 1 { "cent" } else { "cents" }
    );
    match (amount.whole, cents) {
        (_, 0) => dollars,
        (0, _) => cents_words,
        _ => format!("{} and {}", dollars, cents_words),
    }
}

fn percent_words(amount: &Amount) -> String {
    let mut words = number_to_words(amount.whole);
    if !amount.fraction.is_empty() {
        words.push_str(" point");
        for d in amount.fraction.chars().filter_map(|c| c.to_digit(10)) {
            words.push(' ');
            words.push_str(ONES[d as usize]);
        }
    }
    words.push_str(" percent");
    words
}

const ONES: [&str; 20] = [
    "zero",
    "one",
    "two",
    "three",
    "four",
    "five",
    "six",
    "seven",
    "eight",
    "nine",
    "ten",
    "eleven",
    "twelve",
    "thirteen",
    "fourteen",
    "fifteen",
    "sixteen",
    "seventeen",
    "eighteen",
    "nineteen",
];

const TENS: [&str; 10] = [
    "", "", "twenty", "thirty", "forty", "fifty", "sixty", "seventy", "eighty", "ninety",
];

const SCALES: [(u64, &str); 4] = [
    (1_000_000_000_000, "trillion"),
    (1_000_000_000, "billion"),
    (1_000_000, "million"),
    (1_000, "thousand"),
];

/// Spells out a non-negative integer in English.
pub fn number_to_words(n: u64) -> String {
    if n == 0 {
        return ONES[0].to_string();
    }
    let mut parts = Vec::new();
    let mut rest = n;
    for (value, name) in SCALES {
        if rest >= value {
            parts.push(format!("{} {}", number_to_words(rest / value), name));
            rest %= value;
        }
    }
    if rest > 0 {
        parts.push(below_thousand(rest));
    }
    parts.join(" ")
}

fn below_thousand(n: u64) -> String {
    let mut parts = Vec::new();
    let hundreds = n / 100;
    let rest = n % 100;
    if hundreds > 0 {
        parts.push(format!("{} hundred", ONES[hundreds as usize]));
    }
    if rest >= 20 {
        let tens = TENS[(rest / 10) as usize];
        match rest % 10 {
            0 => parts.push(tens.to_string()),
            ones => parts.push(format!("{}-{}", tens, ONES[ones as usize])),
        }
    } else if rest > 0 {
        parts.push(ONES[rest as usize].to_string());
    }
    parts.join(" ")
}
