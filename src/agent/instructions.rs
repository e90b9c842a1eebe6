use chrono::NaiveDate;

use super::registry::ToolSpec;

pub fn build_agent_instructions(tools: &[ToolSpec], today: NaiveDate) -> String {
    let mut tool_lines = String::new();
    for spec in tools {
        tool_lines.push_str(&format!("- {}: {}\n", spec.name, spec.description));
    }

    format!(
        "あなたは店舗の売上データ分析アシスタントです。\n\
         店長からの質問に、売上データを調べた上で日本語で答えてください。\n\
         今日の日付は {today} です。\n\
         利用できるツール:\n{tools}\
         ツールを使うときは、次の形式のJSONのみで応答してください:\n\
         {{\"type\":\"tool_call\",\"tool_name\":\"<tool>\",\"tool_args\":{{...}}}}\n\
         最終回答ができたら、次の形式のJSONのみで応答してください:\n\
         {{\"type\":\"final\",\"content\":\"...\"}}\n\
         JSONの外に余計なテキストを含めないでください。\n\
         グラフのデータURIを受け取った場合は、そのまま最終回答に含めてください。",
        today = today,
        tools = tool_lines
    )
}
