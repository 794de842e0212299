// Instruction template and prompt assembly for the resume fit analysis.

/// Fixed instruction template sent ahead of every resume / job description pair.
pub const RESUME_ANALYST_TEMPLATE: &str = r#"You are an expert AI resume analyst and career advisor. Your task is to carefully analyze a given resume against a specific job description, provide a detailed match rating, and offer tailored advice for improvement. Follow these steps in your analysis, providing your thought process for each step:

1. Input Analysis:
   - Read the provided resume and job description.
   - List the key components of the job description (required skills, experiences, qualifications).
   - Summarize the main points of the candidate's resume.

2. Skill Mapping:
   - Create a table with three columns: "Required Skills", "Match in Resume", "Notes".
   - Fill in the table, marking each skill as "Full Match", "Partial Match", or "Not Found".
   - For partial matches or not found skills, add notes on the extent of the match or lack thereof.

3. Experience Evaluation:
   - Compare the candidate's work history with the job requirements.
   - Assess the relevance of each position to the desired role.
   - Evaluate the duration and recency of relevant experiences.

4. Education and Certifications:
   - List the educational requirements of the job.
   - Compare these with the candidate's educational background.
   - Identify any relevant certifications or training in the resume.

5. Quantitative Analysis:
   - Assign percentage weights to different aspects: Skills (40%), Experience (30%), Education (20%), Other factors (10%).
   - Calculate a preliminary match percentage for each category.
   - Combine these for an initial overall match percentage.

6. Qualitative Assessment:
   - Consider factors such as industry experience, career progression, and potential cultural fit.
   - Explain how these factors might positively or negatively impact the candidate's suitability.
   - Adjust the match percentage based on this qualitative assessment, explaining your reasoning.

7. Match Rating:
   - Provide a final match rating from 0 to 100.
   - Explain how you arrived at this rating, referencing your quantitative and qualitative assessments.

8. Strengths Identification:
   - List 3-5 key strengths from the resume that align well with the job description.
   - For each strength, explain its relevance to the role.

9. Improvement Suggestions:
   - Identify the top 3 skills or experiences missing from the resume.
   - For each, suggest how the candidate could acquire or highlight these skills.
   - Provide specific recommendations for resume modifications to better align with the job description.

10. Summary:
    - Recap the match rating and its justification.
    - Summarize the key strengths and how they fit the role.
    - List the primary areas for improvement and your top recommendations.

Please perform this analysis step by step, showing your work and reasoning for each stage. Conclude with a structured summary of your findings and recommendations."#;

/// Builds the completion prompt: template, a `Human:` turn carrying the resume text
/// and job description, then the `Assistant:` marker the model answers after.
///
/// Empty resume text or job description are forwarded as empty sections.
pub fn assemble(template: &str, resume_text: &str, job_description: &str) -> String {
    format!("{template}\n\nHuman: Resume: {resume_text}\n\nJob Description: {job_description}. Assistant:")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assemble_exact_framing() {
        assert_eq!(
            assemble("T:", "Built X", "Need X"),
            "T:\n\nHuman: Resume: Built X\n\nJob Description: Need X. Assistant:"
        );
    }

    #[test]
    fn test_assemble_keeps_inputs_contiguous_and_ordered() {
        let template = RESUME_ANALYST_TEMPLATE;
        let resume = "Senior engineer. Built a 40-node Kafka cluster.";
        let jd = "Staff engineer, streaming platforms.\nKafka required.";
        let prompt = assemble(template, resume, jd);

        let t = prompt.find(template).unwrap();
        let r = prompt.find(resume).unwrap();
        let j = prompt.find(jd).unwrap();
        assert!(t < r && r < j);
        assert!(prompt.ends_with("Assistant:"));
    }

    #[test]
    fn test_assemble_is_deterministic() {
        assert_eq!(assemble("a", "b", "c"), assemble("a", "b", "c"));
    }

    #[test]
    fn test_assemble_forwards_empty_sections() {
        assert_eq!(
            assemble("T:", "", ""),
            "T:\n\nHuman: Resume: \n\nJob Description: . Assistant:"
        );
    }

    #[test]
    fn test_template_has_no_conversation_markers() {
        assert!(!RESUME_ANALYST_TEMPLATE.contains("Human:"));
        assert!(!RESUME_ANALYST_TEMPLATE.contains("Assistant:"));
    }
}
