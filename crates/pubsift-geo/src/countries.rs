//! Country allow-lists

/// France and its overseas territories, as ISO 3166-1 alpha-2 codes.
pub const FRENCH_TERRITORIES: [&str; 13] = [
    "fr", "gp", "gf", "mq", "re", "yt", "pm", "mf", "bl", "wf", "tf", "nc", "pf",
];

/// Owned copy of [`FRENCH_TERRITORIES`] for configuration defaults.
pub fn french_territories() -> Vec<String> {
    FRENCH_TERRITORIES.iter().map(|c| c.to_string()).collect()
}
