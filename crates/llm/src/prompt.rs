use crate::PromptLanguage;
use serde::{Deserialize, Serialize};

pub const PROMPT_VERSION: &str = "diary-v4";
pub const MAX_KEYWORDS: usize = 10;

/// System and user instruction for one generation call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerationPrompt {
    pub system: String,
    pub user: String,
    pub version: &'static str,
    /// Keyword count the instruction asks for, also the cap applied when parsing.
    pub max_keywords: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptStyle {
    pub language: PromptLanguage,
    /// Share of the narrative drawn from the photo, the rest comes from the user.
    pub photo_weight: u8,
    pub min_sentences: usize,
    pub max_keywords: usize,
}

impl Default for PromptStyle {
    fn default() -> Self {
        Self {
            language: PromptLanguage::Korean,
            photo_weight: 30,
            min_sentences: 5,
            max_keywords: MAX_KEYWORDS,
        }
    }
}

/// Renders the diary prompt. All variants share one response contract: a JSON
/// object with `refined_caption` (string) and `keywords` (array of at most
/// `max_keywords` strings).
#[derive(Debug, Clone, Default)]
pub struct PromptBuilder {
    style: PromptStyle,
}

impl PromptBuilder {
    pub fn new(style: PromptStyle) -> Self {
        let max_keywords = style.max_keywords.clamp(1, MAX_KEYWORDS);
        let photo_weight = style.photo_weight.min(100);
        Self {
            style: PromptStyle {
                max_keywords,
                photo_weight,
                ..style
            },
        }
    }

    pub fn style(&self) -> &PromptStyle {
        &self.style
    }

    pub fn build(&self, caption: &str, user_context: Option<&str>) -> GenerationPrompt {
        self.build_with_mood(caption, user_context, None)
    }

    pub fn build_with_mood(
        &self,
        caption: &str,
        user_context: Option<&str>,
        mood: Option<&str>,
    ) -> GenerationPrompt {
        let caption = caption.trim();
        let user_context = user_context.map(str::trim).filter(|v| !v.is_empty());
        let mood = mood.map(str::trim).filter(|v| !v.is_empty());

        let (system, user) = match self.style.language {
            PromptLanguage::Korean => (self.korean_system(), self.korean_user(caption, user_context, mood)),
            PromptLanguage::English => (self.english_system(), self.english_user(caption, user_context, mood)),
        };

        GenerationPrompt {
            system,
            user,
            version: PROMPT_VERSION,
            max_keywords: self.style.max_keywords,
        }
    }

    fn korean_system(&self) -> String {
        format!(
            "당신은 시각장애인을 위한 사진 일기 앱을 사용하는 시각장애인 입니다. \
             사진 정보와 사용자의 음성 일기를 자연스럽게 결합하여 TTS로 읽힐 완성된 일기를 작성하세요. \
             You must always respond in valid JSON format with exactly two keys: \
             'refined_caption' (string, in Korean) and 'keywords' (array of up to {n} Korean nouns or noun phrases). \
             If you cannot find {n} keywords, return as many as you can; never invent filler keywords. \
             Do not include any extra text outside the JSON.",
            n = self.style.max_keywords
        )
    }

    fn korean_user(&self, caption: &str, user_context: Option<&str>, mood: Option<&str>) -> String {
        let user_weight = 100 - self.style.photo_weight;
        let mut prompt = String::from("## 입력 정보\n");
        prompt.push_str(&format!("1. 사진 정보: {}\n", caption));
        prompt.push_str(&format!(
            "2. 사용자 음성 일기: {}\n",
            user_context.unwrap_or("(없음)")
        ));
        if let Some(mood) = mood {
            prompt.push_str(&format!("3. 사진 분위기: {}\n", mood));
        }

        prompt.push_str(&format!(
            "\n## 작성 규칙\n\
             ### 구조 ({min}문장 이상)\n\
             - 시작: 사진 속 장면으로 자연스럽게 시작\n\
             - 중간: 사용자의 감정과 경험을 녹여냄\n\
             ### 스타일\n\
             - 1인칭 과거형 일기체 (예: ~했다, ~였다, ~이었다)\n\
             - 개인이 자신의 경험을 회상하며 쓰는 톤\n\
             - '-습니다/-어요/-네요' 같은 설명체, 경어체 절대 금지\n\
             - TTS 고려하여 쉼표, 마침표 적절히 배치\n\
             - 솔직한 톤\n\n\
             ### 비중\n\
             - 사진 정보 {photo}%, 사용자 음성 일기 {user}%\n\
             - 사용자 음성 일기 필수 반영\n\n\
             ### 금지사항\n\
             - '사진에는~', '캡션에는~' 같은 메타적 표현 금지\n\
             - 사진에 없는 정보 창작 금지\n\
             - 사용자 입력의 핵심 의미 왜곡/누락 금지\n\n\
             ## 출력 형식\n\
             아래 JSON 형식으로만 출력하세요. 다른 설명 금지.\n\
             {{\n  \"refined_caption\": \"작성 규칙에 따른 1인칭 일기 전체 내용\",\n  \
             \"keywords\": [\"키워드1\", \"키워드2\", \"... (최대 {n}개)\"]\n}}",
            min = self.style.min_sentences,
            photo = self.style.photo_weight,
            user = user_weight,
            n = self.style.max_keywords,
        ));
        prompt
    }

    fn english_system(&self) -> String {
        format!(
            "You are a visually impaired person using a photo diary app. \
             Combine the photo information and the user's spoken diary into a finished diary entry that will be read aloud by TTS. \
             You must always respond in valid JSON format with exactly two keys: \
             'refined_caption' (string, in English) and 'keywords' (array of up to {n} English nouns or noun phrases). \
             If you cannot find {n} keywords, return as many as you can; never invent filler keywords. \
             Do not include any extra text outside the JSON.",
            n = self.style.max_keywords
        )
    }

    fn english_user(&self, caption: &str, user_context: Option<&str>, mood: Option<&str>) -> String {
        let user_weight = 100 - self.style.photo_weight;
        let mut prompt = String::from("## Input\n");
        prompt.push_str(&format!("1. Photo: {}\n", caption));
        prompt.push_str(&format!(
            "2. User's spoken diary: {}\n",
            user_context.unwrap_or("(none)")
        ));
        if let Some(mood) = mood {
            prompt.push_str(&format!("3. Photo mood: {}\n", mood));
        }

        prompt.push_str(&format!(
            "\n## Rules\n\
             ### Structure (at least {min} sentences)\n\
             - Open naturally with the scene in the photo\n\
             - Weave in the user's feelings and experience\n\
             ### Style\n\
             - First person, past tense, diary voice\n\
             - Punctuate for text-to-speech\n\
             - Honest tone\n\n\
             ### Weighting\n\
             - Photo {photo}%, user's diary {user}%\n\
             - The user's diary must be reflected\n\n\
             ### Do not\n\
             - Use meta expressions such as \"the photo shows\" or \"the caption says\"\n\
             - Invent details that are not in the photo\n\
             - Distort or drop the core meaning of the user's input\n\n\
             ## Output\n\
             Respond only with this JSON, nothing else.\n\
             {{\n  \"refined_caption\": \"the full first-person diary entry\",\n  \
             \"keywords\": [\"keyword1\", \"keyword2\", \"... (up to {n})\"]\n}}",
            min = self.style.min_sentences,
            photo = self.style.photo_weight,
            user = user_weight,
            n = self.style.max_keywords,
        ));
        prompt
    }
}
