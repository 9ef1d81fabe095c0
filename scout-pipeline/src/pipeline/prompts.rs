//! Instruction text for each dispatch

use scout_sdk::{TaskSpec, WorkerId};

use crate::request::AnalysisRequest;

/// Placeholder used in place of a missing analysis
pub fn placeholder(worker: WorkerId) -> String {
    format!("No {} analysis available", worker.label())
}

/// Output contract appended to each analyst task
fn output_contract(worker: WorkerId) -> &'static str {
    match worker {
        WorkerId::Trend => {
            "Respond with JSON: trend_score (1-100), trend_direction (rising|stable|declining), \
             seasonality {peak_months, low_months, seasonal_impact}, related_queries [{query, trend}]."
        }
        WorkerId::Market => {
            "Respond with JSON: market_size {tam, sam, som, currency}, growth_rate (decimal), \
             customer_segments [{name, percentage, description}], \
             maturity_level (emerging|growing|mature|declining), market_score (1-100)."
        }
        WorkerId::Competition => {
            "Respond with JSON: competitors [{name, price, rating, strengths}], \
             competition_score (1-100, higher = more competitive), pricing_analysis {min, max, average}, \
             opportunities [str], entry_barriers (low|medium|high)."
        }
        WorkerId::Profit => {
            "Respond with JSON: unit_economics, margins, monthly_projection, investment, \
             assessment {profitable, rating, recommendation}, profit_score (1-100)."
        }
        WorkerId::Evaluator => {
            "Respond with JSON: opportunity_score (1-100), dimension_scores {trend, market, competition, profit}, \
             swot_analysis {strengths, weaknesses, opportunities, threats}, recommendation (go|cautious|no-go), \
             recommendation_detail, key_risks [str], success_factors [str]."
        }
        WorkerId::Report => "Respond with a complete Markdown report.",
    }
}

fn tools(worker: WorkerId) -> &'static [&'static str] {
    match worker {
        WorkerId::Trend => &["search_trends"],
        WorkerId::Market => &["search_market_data"],
        WorkerId::Competition => &["search_competition_data"],
        WorkerId::Profit => &["search_profit_data", "calculate_unit_economics"],
        WorkerId::Evaluator | WorkerId::Report => &[],
    }
}

fn request_header(request: &AnalysisRequest) -> String {
    let mut header = format!(
        "Product category: {}\nTarget market: {}\nBudget: {}\nBusiness model: {}",
        request.category(),
        request.target_market(),
        request.budget_range(),
        request.business_model()
    );
    if !request.keywords().is_empty() {
        header.push_str(&format!("\nKeywords: {}", request.keywords().join(", ")));
    }
    header
}

/// Task for one analyst worker
pub fn analyst_task(worker: WorkerId, request: &AnalysisRequest) -> TaskSpec {
    let instruction = format!(
        "Perform the {} analysis.\n\n{}\n\n{}",
        worker.label(),
        request_header(request),
        output_contract(worker)
    );
    TaskSpec::new(worker, instruction).with_tools(tools(worker))
}

/// Coordinator instruction for the merged fan-out dispatch
pub fn fanout_instruction(request: &AnalysisRequest) -> String {
    format!(
        "Run the trend, market, competition and profit analyses in parallel for the product below. \
         Tag every event with the worker that produced it.\n\n{}",
        request_header(request)
    )
}

/// Synthesis request for the evaluator. `analyses` is in analyst slot order.
pub fn evaluation_instruction(request: &AnalysisRequest, analyses: &[(WorkerId, String)]) -> String {
    let mut body = format!(
        "Evaluate the overall product opportunity from the analyses below.\n\n{}\n",
        request_header(request)
    );
    for (worker, text) in analyses {
        body.push_str(&format!("\n## {} analysis\n{}\n", worker.label(), text));
    }
    body.push('\n');
    body.push_str(output_contract(WorkerId::Evaluator));
    body
}

/// Report request built from the five records (or their placeholders)
pub fn report_instruction(request: &AnalysisRequest, sections: &[(WorkerId, String)]) -> String {
    let mut body = format!(
        "Write the final product opportunity report with an executive summary, \
         the four analyses, a SWOT section and a recommendation.\n\n{}\n",
        request_header(request)
    );
    for (worker, text) in sections {
        body.push_str(&format!("\n## {}\n{}\n", worker.label(), text));
    }
    body.push('\n');
    body.push_str(output_contract(WorkerId::Report));
    body
}
