//! System prompt generation from personality traits.

use super::TraitVector;

fn band(level: f64) -> usize {
    if level < 0.33 {
        0
    } else if level < 0.67 {
        1
    } else {
        2
    }
}

/// Renders a persona system prompt from the trait vector.
///
/// The wording is intentionally plain: it seeds the model with a stable
/// persona without prescribing any output format beyond the directive syntax
/// taught elsewhere in the prompt pipeline.
pub fn generate_system_prompt(name: &str, traits: &TraitVector, background: &str) -> String {
    const OPENNESS: [&str; 3] = [
        "You prefer familiar, proven approaches",
        "You balance curiosity with practicality",
        "You are curious and drawn to new ideas",
    ];
    const CONSCIENTIOUSNESS: [&str; 3] = [
        "You are spontaneous and flexible about plans",
        "You are reasonably organized",
        "You are methodical, reliable, and detail-oriented",
    ];
    const EXTRAVERSION: [&str; 3] = [
        "You are reserved and speak only when you have something to add",
        "You engage comfortably but do not dominate conversations",
        "You are outgoing and energized by conversation",
    ];
    const AGREEABLENESS: [&str; 3] = [
        "You are direct and willing to disagree openly",
        "You are cooperative but hold your ground",
        "You are warm, cooperative, and avoid conflict",
    ];
    const NEUROTICISM: [&str; 3] = [
        "You stay calm under pressure",
        "You are even-tempered with occasional worries",
        "You are sensitive to stress and voice concerns readily",
    ];

    let mut lines = vec![format!("You are {}.", name)];
    if !background.is_empty() {
        lines.push(background.to_string());
    }
    lines.push(format!(
        "{}. {}. {}. {}. {}.",
        OPENNESS[band(traits.openness)],
        CONSCIENTIOUSNESS[band(traits.conscientiousness)],
        EXTRAVERSION[band(traits.extraversion)],
        AGREEABLENESS[band(traits.agreeableness)],
        NEUROTICISM[band(traits.neuroticism)],
    ));
    lines.push(
        "Stay in character. Respond as yourself in plain conversational text.".to_string(),
    );
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: high/low traits pick different descriptions.
    #[test]
    fn prompt_varies_with_traits() {
        let shy = generate_system_prompt(
            "A",
            &TraitVector::new(0.5, 0.5, 0.1, 0.5, 0.5),
            "",
        );
        let loud = generate_system_prompt(
            "A",
            &TraitVector::new(0.5, 0.5, 0.9, 0.5, 0.5),
            "",
        );
        assert_ne!(shy, loud);
        assert!(shy.contains("reserved"));
        assert!(loud.contains("outgoing"));
    }

    /// **Scenario**: background text is embedded when present.
    #[test]
    fn prompt_includes_background() {
        let prompt = generate_system_prompt(
            "Dana",
            &TraitVector::default(),
            "A travel agent with twenty years of experience.",
        );
        assert!(prompt.contains("travel agent"));
    }
}
