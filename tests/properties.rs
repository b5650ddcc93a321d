//! Property tests over random agent graphs and tool fan-outs.

use std::collections::{BTreeSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use proptest::prelude::*;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::json;
use tower_agents::model::{model_fn, ModelRequest, ModelResponse, ToolCallRequest};
use tower_agents::{
    tool_typed, Agent, AgentGraph, BoxError, ConversationItem, Handoff, ItemHelpers, RunConfig,
    RunContext, Runner,
};

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(future)
}

fn graph_strategy() -> impl Strategy<Value = (usize, BTreeSet<(usize, usize)>)> {
    (2usize..6).prop_flat_map(|n| {
        let edges = prop::collection::btree_set((0..n, 0..n), 0..(n * n))
            .prop_map(|set| set.into_iter().filter(|(a, b)| a != b).collect());
        (Just(n), edges)
    })
}

fn build_graph(n: usize, edges: &BTreeSet<(usize, usize)>) -> AgentGraph {
    let agents = (0..n).map(|i| {
        edges
            .iter()
            .filter(|(from, _)| *from == i)
            .fold(Agent::new(format!("agent_{}", i), "Route or answer."), |agent, (_, to)| {
                agent.with_handoff(Handoff::to(format!("agent_{}", to)))
            })
    });
    AgentGraph::new(agents).unwrap()
}

/// Backend that follows `choices` through whatever handoff tools are offered,
/// then answers with text.
fn choosing_model(choices: Vec<usize>) -> tower_agents::ModelSvc {
    let choices = Arc::new(Mutex::new(VecDeque::from(choices)));
    model_fn(move |req: ModelRequest| {
        let choice = choices.lock().unwrap().pop_front();
        async move {
            match choice {
                Some(choice) if !req.tools.is_empty() => {
                    let tool = &req.tools[choice % req.tools.len()];
                    Ok::<_, BoxError>(ModelResponse::tool_call(tool.name.clone(), json!({})))
                }
                _ => Ok(ModelResponse::text(format!("answered by {}", req.agent))),
            }
        }
    })
}

#[derive(Debug, Deserialize, JsonSchema)]
struct Echo {
    tag: usize,
    delay_ms: u64,
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn handoffs_follow_declared_edges(
        (n, edges) in graph_strategy(),
        choices in prop::collection::vec(0usize..8, 0..8),
    ) {
        let graph = build_graph(n, &edges);
        let declared: BTreeSet<(String, String)> = graph
            .edges()
            .into_iter()
            .map(|(a, b)| (a.to_string(), b.to_string()))
            .collect();
        let reachable = graph.reachable_from("agent_0");
        let turns = choices.len() + 1;
        let runner = Runner::new(graph, choosing_model(choices))
            .with_config(RunConfig::default().with_max_turns(turns));

        let result = block_on(runner.run("agent_0", "hello", &RunContext::new(())))
            .map_err(|e| TestCaseError::fail(e.to_string()))?;

        let mut current = "agent_0".to_string();
        for (source, target) in result.handoffs() {
            prop_assert_eq!(source, current.as_str());
            prop_assert!(declared.contains(&(source.to_string(), target.to_string())));
            current = target.to_string();
        }
        prop_assert_eq!(&result.last_agent, &current);
        prop_assert!(reachable.contains(&result.last_agent));
        prop_assert_eq!(result.final_output, json!(format!("answered by {}", current)));
    }

    #[test]
    fn tool_free_run_appends_exactly_one_message(
        texts in prop::collection::vec("[a-z ]{1,12}", 1..5),
        reply in "[A-Za-z]{1,20}",
    ) {
        let input: Vec<ConversationItem> = texts.iter().map(ConversationItem::user).collect();
        let answer = reply.clone();
        let model = model_fn(move |_req: ModelRequest| {
            let answer = answer.clone();
            async move { Ok::<_, BoxError>(ModelResponse::text(answer)) }
        });
        let runner = Runner::for_agent(Agent::new("solo", "Answer."), model).unwrap();

        let result = block_on(runner.run("solo", input.clone(), &RunContext::new(())))
            .map_err(|e| TestCaseError::fail(e.to_string()))?;

        let mut expected = input;
        expected.push(ConversationItem::agent_text("solo", reply));
        prop_assert_eq!(result.history, expected);
        prop_assert_eq!(result.turns, 1);
    }

    #[test]
    fn tool_results_keep_call_order(
        delays in prop::collection::vec(0u64..15, 1..6),
        parallel in any::<bool>(),
    ) {
        let echo = tool_typed("echo", "Echo a tag.", |args: Echo| async move {
            tokio::time::sleep(Duration::from_millis(args.delay_ms)).await;
            Ok::<_, BoxError>(args.tag)
        });
        let calls: Vec<_> = delays
            .iter()
            .enumerate()
            .map(|(tag, delay)| ToolCallRequest::new("echo", json!({"tag": tag, "delay_ms": delay})))
            .collect();
        let first = Arc::new(Mutex::new(Some(calls)));
        let model = model_fn(move |_req: ModelRequest| {
            let calls = first.lock().unwrap().take();
            async move {
                Ok::<_, BoxError>(match calls {
                    Some(calls) => ModelResponse::tool_calls(calls),
                    None => ModelResponse::text("done"),
                })
            }
        });
        let runner = Runner::for_agent(Agent::new("fan", "Fan out.").with_tool(echo), model)
            .unwrap()
            .with_config(RunConfig::default().with_parallel_tools(parallel));

        let result = block_on(runner.run("fan", "go", &RunContext::new(())))
            .map_err(|e| TestCaseError::fail(e.to_string()))?;

        let outputs: Vec<_> = ItemHelpers::tool_results(&result.history)
            .into_iter()
            .map(|(_, output, _)| output.clone())
            .collect();
        let expected: Vec<_> = (0..delays.len()).map(|tag| json!(tag)).collect();
        prop_assert_eq!(outputs, expected);
    }
}
