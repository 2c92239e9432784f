//! `mnemo classify`: Show the value tier of a piece of text.

use mnemo_agent::ValueClassifier;

pub fn run(text: &str) -> Result<(), Box<dyn std::error::Error>> {
    let assessment = ValueClassifier::new().classify(text);
    println!("  Tier:        {}", assessment.tier);
    println!("  Max budget:  {} tokens", assessment.max_budget);
    println!("  Complexity:  {:.3}", assessment.complexity);
    Ok(())
}
