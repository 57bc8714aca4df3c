/// Prompt asking for a short, practical fix for one audit finding.
pub fn fix_prompt(description: &str) -> String {
    format!(
        "You are an expert web accessibility consultant.\n\n\
         Here is an accessibility issue found on a webpage:\n\n\
         \"{description}\"\n\n\
         Explain clearly in 2-3 sentences how to fix this issue for a web developer.\n\
         Keep it simple and practical.\n"
    )
}
