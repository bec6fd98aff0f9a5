use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use parley_core::tools::{Tool, ToolContext, ToolError, ToolResult};

#[derive(Deserialize)]
struct CalculatorArgs {
    first_num: f64,
    second_num: f64,
    operation: String,
}

/// Basic arithmetic on two operands.
pub struct CalculatorTool;

impl CalculatorTool {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CalculatorTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for CalculatorTool {
    fn name(&self) -> &str {
        "calculator"
    }

    fn description(&self) -> &str {
        "Perform a basic arithmetic operation on two numbers. Supported operations: add, sub, mul, div."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "first_num": {"type": "number", "description": "Left operand"},
                "second_num": {"type": "number", "description": "Right operand"},
                "operation": {
                    "type": "string",
                    "enum": ["add", "sub", "mul", "div"],
                    "description": "Operation to apply"
                }
            },
            "required": ["first_num", "second_num", "operation"]
        })
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<ToolResult, ToolError> {
        let args: CalculatorArgs = serde_json::from_value(args)?;
        Ok(calculate(args.first_num, args.second_num, &args.operation))
    }
}

/// Evaluate one operation. Never fails outward: bad input is an error payload.
pub fn calculate(first_num: f64, second_num: f64, operation: &str) -> ToolResult {
    let result = match operation {
        "add" => first_num + second_num,
        "sub" => first_num - second_num,
        "mul" => first_num * second_num,
        "div" => {
            if second_num == 0.0 {
                return ToolResult::error("Division by zero is not allowed");
            }
            first_num / second_num
        }
        other => return ToolResult::error(format!("Unsupported operation '{other}'")),
    };
    ToolResult::ok(json!({
        "first_num": number(first_num),
        "second_num": number(second_num),
        "operation": operation,
        "result": number(result),
    }))
}

/// Whole numbers are reported as integers (`20`, not `20.0`). JSON has no
/// infinity, so overflowed results are spelled out (`"inf"`, `"-inf"`).
fn number(n: f64) -> Value {
    const EXACT: f64 = 9_007_199_254_740_992.0; // 2^53
    if !n.is_finite() {
        json!(n.to_string())
    } else if n.fract() == 0.0 && n.abs() < EXACT {
        json!(n as i64)
    } else {
        json!(n)
    }
}
