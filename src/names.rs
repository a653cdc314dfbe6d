use anyhow::Result;
use regex::Regex;

const ADJECTIVES: &[&str] = &[
    "admiring", "agitated", "amazing", "awesome", "blissful", "bold", "brave", "charming",
    "clever", "compassionate", "confident", "cool", "dazzling", "determined", "eager",
    "ecstatic", "elegant", "epic", "festive", "focused", "friendly", "gifted", "gracious",
    "happy", "hopeful", "inspiring", "jolly", "keen", "kind", "laughing", "loving", "lucid",
    "magical", "modest", "nice", "nifty", "optimistic", "peaceful", "practical", "quirky",
    "relaxed", "serene", "sharp", "stoic", "sweet", "tender", "trusting", "upbeat", "vibrant",
    "wizardly", "youthful", "zealous",
];

const SURNAMES: &[&str] = &[
    "albattani", "almeida", "archimedes", "babbage", "bardeen", "bhabha", "bohr", "cannon",
    "curie", "darwin", "dijkstra", "einstein", "euclid", "fermat", "feynman", "galileo",
    "goldberg", "goodall", "hamilton", "hawking", "heisenberg", "hodgkin", "hopper",
    "hypatia", "johnson", "kepler", "knuth", "lamport", "leakey", "lovelace", "mayer",
    "mccarthy", "meitner", "mirzakhani", "newton", "noether", "pasteur", "perlman", "pike",
    "ritchie", "shannon", "sinoussi", "tesla", "thompson", "torvalds", "turing", "wilson",
    "wozniak", "wright", "yalow",
];

const DNS_LABEL: &str = r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?$";

/// Deployment names become namespace names, so they must be RFC 1123 labels.
pub fn validate_name(name: &str) -> Result<()> {
    let label = Regex::new(DNS_LABEL)?;
    if name.len() > 63 || !label.is_match(name) {
        anyhow::bail!(
            "the deployment name '{}' is invalid, a lowercase RFC 1123 label must consist of \
             lower case alphanumeric characters or '-', and must start and end with an \
             alphanumeric character",
            name
        );
    }
    Ok(())
}

/// Random `adjective-surname` deployment name.
pub fn random_name() -> Result<String> {
    let mut bytes = [0u8; 4];
    getrandom::getrandom(&mut bytes)
        .map_err(|e| anyhow::anyhow!("generate random name: {}", e))?;
    let a = u16::from_le_bytes([bytes[0], bytes[1]]) as usize % ADJECTIVES.len();
    let s = u16::from_le_bytes([bytes[2], bytes[3]]) as usize % SURNAMES.len();
    Ok(format!("{}-{}", ADJECTIVES[a], SURNAMES[s]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_names() {
        for name in ["rasa", "my-bot", "a1", "0"] {
            assert!(validate_name(name).is_ok(), "{name} should be valid");
        }
    }

    #[test]
    fn invalid_names() {
        let long = "a".repeat(64);
        for name in ["", "My-Bot", "-bot", "bot-", "bot_1", "bot.x", long.as_str()] {
            assert!(validate_name(name).is_err(), "{name} should be invalid");
        }
    }

    #[test]
    fn random_names_are_valid_labels() {
        for _ in 0..50 {
            let name = random_name().unwrap();
            validate_name(&name).unwrap();
            assert!(name.contains('-'));
        }
    }
}
