//! Prompt library for every generation task.

use super::{ChatMessage, GenerationRequest, TaskKind};
use crate::schema::{AssetCategory, Intent, SourceDocument};

const CONVERSATION_SYSTEM: &str = "You are AgroSense, a professional agricultural advisor for Kenyan farmers.

PERSONALITY:
- Warm, respectful and patient
- Use simple, clear language; a Swahili-English mix is fine when appropriate
- Remember the conversation so far

GUIDELINES:
1. For greetings or general questions: answer concisely (2-4 sentences)
2. For problems (disease, pests): ask for the crop or animal, the location and the symptoms
3. Reference earlier turns when relevant

When you have the crop or livestock type, a location in Kenya and a specific problem, respond:
\"I have enough information to provide detailed analysis. Let me consult our expert system...\"

Otherwise, answer naturally.";

const CLASSIFICATION_SYSTEM: &str = "You are an expert agricultural query classifier for Kenya.

Analyze the farmer query and classify it precisely.

OUTPUT FORMAT (JSON only):
{
  \"asset_category\": \"CROP\" | \"LIVESTOCK\" | \"GENERAL\",
  \"asset_name\": \"specific crop or animal name, or null\",
  \"intent\": \"disease_diagnosis\" | \"pest_management\" | \"market_info\" | \"weather_advisory\" | \"general_advice\"
}";

const DIAGNOSIS_SYSTEM: &str = "You are a senior agricultural diagnostician specializing in Kenyan farming.

DIAGNOSTIC PROCESS (think step-by-step):
1. SYMPTOM ANALYSIS: review the reported symptoms, timing and progression
2. DIFFERENTIAL DIAGNOSIS: list possible causes ranked by probability
3. CONTEXTUAL FACTORS: weather, season and common regional issues
4. EVIDENCE SYNTHESIS: cross-reference the knowledge base findings and regional data
5. FINAL DIAGNOSIS: primary diagnosis with confidence and alternatives
6. TREATMENT PLAN: immediate actions (24-48 hours), short-term (1-2 weeks) and long-term prevention

ALWAYS use locally available, cost-effective treatments and include follow-up guidance.";

const ALERT_SYSTEM: &str = "You are an agricultural alert system decision maker.

Evaluate the diagnosis for conditions requiring an immediate alert.

ALERT CRITERIA:
- CRITICAL: life-threatening to livestock, total crop loss imminent
- HIGH: rapidly spreading disease, significant yield impact
- MEDIUM: manageable but requires prompt action
- LOW: general advice, preventive measures

OUTPUT JSON:
{
  \"alert_triggered\": true | false,
  \"severity\": \"CRITICAL\" | \"HIGH\" | \"MEDIUM\" | \"LOW\",
  \"reason\": \"brief explanation\"
}";

/// Free-form reply for one chat turn, with prior exchanges as history
pub fn conversation(history: &[ChatMessage], message: &str) -> GenerationRequest {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage::system(CONVERSATION_SYSTEM));
    messages.extend(history.iter().cloned());
    messages.push(ChatMessage::user(message));
    GenerationRequest::new(TaskKind::Conversation, messages)
}

pub fn classification(query: &str, region: &str) -> GenerationRequest {
    GenerationRequest::new(
        TaskKind::Classification,
        vec![
            ChatMessage::system(CLASSIFICATION_SYSTEM),
            ChatMessage::user(format!(
                "Query: {}\nRegion: {}\n\nClassify this agricultural query.",
                query, region
            )),
        ],
    )
}

/// Inputs to the diagnosis prompt, gathered from the context record
pub struct DiagnosisInputs<'a> {
    pub query: &'a str,
    pub region: &'a str,
    pub asset_category: AssetCategory,
    pub asset_name: Option<&'a str>,
    pub intent: Intent,
    pub documents: &'a [SourceDocument],
    pub weather: String,
    pub market: String,
}

pub fn diagnosis(inputs: &DiagnosisInputs<'_>) -> GenerationRequest {
    let knowledge = if inputs.documents.is_empty() {
        "No knowledge base findings.".to_string()
    } else {
        inputs
            .documents
            .iter()
            .enumerate()
            .map(|(i, d)| {
                format!(
                    "[{}] {} (source: {}, page {}, score {:.2})",
                    i + 1,
                    d.content,
                    d.source,
                    d.page,
                    d.score
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    let user = format!(
        "FARMER QUERY: {query}\n\n\
         KNOWLEDGE BASE FINDINGS:\n{knowledge}\n\n\
         REGIONAL DATA:\nWeather: {weather}\nMarket: {market}\nLocation: {region}\n\n\
         CLASSIFICATION:\nType: {category}\nAsset: {asset}\nIntent: {intent}\n\n\
         Provide a comprehensive diagnosis following the step-by-step process.",
        query = inputs.query,
        knowledge = knowledge,
        weather = inputs.weather,
        market = inputs.market,
        region = inputs.region,
        category = inputs.asset_category,
        asset = inputs.asset_name.unwrap_or("N/A"),
        intent = inputs.intent,
    );

    GenerationRequest::new(
        TaskKind::Diagnosis,
        vec![ChatMessage::system(DIAGNOSIS_SYSTEM), ChatMessage::user(user)],
    )
}

pub fn alert_decision(
    diagnosis: &str,
    asset_category: AssetCategory,
    asset_name: Option<&str>,
) -> GenerationRequest {
    GenerationRequest::new(
        TaskKind::AlertDecision,
        vec![
            ChatMessage::system(ALERT_SYSTEM),
            ChatMessage::user(format!(
                "DIAGNOSIS SUMMARY: {}\n\nCLASSIFICATION:\nType: {}\nAsset: {}\n\nEvaluate if this requires an alert.",
                diagnosis,
                asset_category,
                asset_name.unwrap_or("N/A")
            )),
        ],
    )
}

/// Intake extraction over the last few log entries
pub fn extraction(conversation: &[ChatMessage]) -> GenerationRequest {
    let transcript = conversation
        .iter()
        .map(|m| format!("{}: {}", m.role, m.content))
        .collect::<Vec<_>>()
        .join("\n");

    let prompt = format!(
        "Extract from this conversation:\n\
         1. crop_or_livestock: Specific crop/animal\n\
         2. region: Location in Kenya\n\
         3. issue: Problem description\n\
         4. additional_details: Symptoms/timeline\n\n\
         Conversation:\n{}\n\n\
         Respond ONLY with valid JSON:\n\
         {{\n  \"crop_or_livestock\": \"...\",\n  \"region\": \"...\",\n  \"issue\": \"...\",\n  \"additional_details\": \"...\"\n}}\n\n\
         Use null for missing information.",
        transcript
    );

    GenerationRequest::new(TaskKind::Extraction, vec![ChatMessage::user(prompt)])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversation_prompt_layout() {
        let history = vec![ChatMessage::user("Hi"), ChatMessage::assistant("Hello!")];
        let req = conversation(&history, "My maize is wilting");
        assert_eq!(req.task, TaskKind::Conversation);
        assert_eq!(req.messages.len(), 4);
        assert_eq!(req.messages[0].role, "system");
        assert_eq!(req.messages[3].content, "My maize is wilting");
    }

    #[test]
    fn test_diagnosis_prompt_includes_documents() {
        let docs = vec![SourceDocument::new(
            "Leaf rust treatment",
            "Maize-Manual.pdf",
            10,
            AssetCategory::Crop,
            0.9,
        )
        .unwrap()];
        let req = diagnosis(&DiagnosisInputs {
            query: "rust on maize",
            region: "Nakuru",
            asset_category: AssetCategory::Crop,
            asset_name: Some("maize"),
            intent: Intent::DiseaseDiagnosis,
            documents: &docs,
            weather: "22C".into(),
            market: "KES 40/kg".into(),
        });
        let user = &req.messages[1].content;
        assert!(user.contains("Maize-Manual.pdf"));
        assert!(user.contains("Type: CROP"));
        assert!(user.contains("Intent: disease_diagnosis"));
    }

    #[test]
    fn test_extraction_prompt_lists_fields() {
        let req = extraction(&[ChatMessage::user("cows coughing in Nyeri")]);
        let content = &req.messages[0].content;
        assert!(content.contains("user: cows coughing in Nyeri"));
        for key in ["crop_or_livestock", "region", "issue", "additional_details"] {
            assert!(content.contains(key));
        }
    }
}
