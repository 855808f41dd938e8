use crate::output::LogEntry;
use crate::HarvestError;
use serde_json::Value;
use std::fmt;
use std::path::Path;

/// Top-level key split off a request line as caller metadata
pub const METADATA_KEY: &str = "metadata";

/// One request body plus the caller's correlation metadata
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    /// JSON body sent to the endpoint
    pub body: Value,

    /// Caller metadata, echoed into the outcome log but never sent
    pub metadata: Option<Value>,
}

impl CompletionRequest {
    /// Splits a request line into body and metadata
    ///
    /// # Returns
    ///
    /// An error message if `value` is not a JSON object
    pub fn from_value(value: Value) -> Result<Self, String> {
        let Value::Object(mut body) = value else {
            return Err("request must be a JSON object".to_string());
        };

        let metadata = body.remove(METADATA_KEY);
        Ok(Self {
            body: Value::Object(body),
            metadata,
        })
    }
}

impl CompletionRequest {
    /// The request as an input line, metadata merged back in
    pub fn to_line_value(&self) -> Value {
        let mut value = self.body.clone();
        if let (Value::Object(map), Some(metadata)) = (&mut value, &self.metadata) {
            map.insert(METADATA_KEY.to_string(), metadata.clone());
        }
        value
    }
}

/// Prints the request as one JSONL input line
impl fmt::Display for CompletionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_line_value())
    }
}

impl LogEntry for CompletionRequest {
    fn request(&self) -> Value {
        self.body.clone()
    }

    fn metadata(&self) -> Option<Value> {
        self.metadata.clone()
    }
}

/// Loads a JSONL request file
///
/// Blank lines are skipped. Any other line that is not a JSON object fails
/// the load, since silently dropping requests would lose work.
pub fn load_requests(path: &Path) -> Result<Vec<CompletionRequest>, HarvestError> {
    let content = std::fs::read_to_string(path)?;
    parse_requests(&content, &path.display().to_string())
}

fn parse_requests(content: &str, origin: &str) -> Result<Vec<CompletionRequest>, HarvestError> {
    let mut requests = Vec::new();

    for (index, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }

        let input_error = |message: String| HarvestError::Input {
            path: origin.to_string(),
            line: index + 1,
            message,
        };

        let value: Value = serde_json::from_str(line).map_err(|e| input_error(e.to_string()))?;
        requests.push(CompletionRequest::from_value(value).map_err(input_error)?);
    }

    Ok(requests)
}
