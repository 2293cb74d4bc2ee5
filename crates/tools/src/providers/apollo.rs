//! Apollo Client cache and active queries.

use cdp::CdpClient;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::provider::{NoArgs, RegisteredTool, ToolSet};
use crate::script::Script;

const FIND_CLIENT: &str = r#"
  const client = window.__APOLLO_CLIENT__
    || (window.__APOLLO_DEVTOOLS_GLOBAL_HOOK__ && window.__APOLLO_DEVTOOLS_GLOBAL_HOOK__.ApolloClient);
"#;

const GET_CACHE: &str = r#"(args) => {
  __FIND_CLIENT__
  if (!client || !client.cache) return { available: false };
  const data = client.cache.extract();
  const keys = Object.keys(data);
  const picked = args.typename
    ? keys.filter(k => data[k] && data[k].__typename === args.typename)
    : keys;
  const entries = {};
  for (const k of picked.slice(0, args.limit)) entries[k] = __mcp.safe(data[k], 5);
  return { entries, total: keys.length, returned: Object.keys(entries).length };
}"#;

const GET_QUERIES: &str = r#"(args) => {
  __FIND_CLIENT__
  if (!client) return { available: false };
  const queries = [];
  if (typeof client.getObservableQueries === 'function') {
    client.getObservableQueries('all').forEach((q, id) => {
      const result = typeof q.getCurrentResult === 'function' ? q.getCurrentResult() : {};
      queries.push({
        id: String(id),
        operationName: q.queryName || null,
        variables: __mcp.safe(q.variables, 4),
        loading: !!result.loading,
        networkStatus: result.networkStatus,
        error: result.error ? String(result.error.message || result.error) : null
      });
    });
  } else if (client.queryManager && client.queryManager.queries) {
    client.queryManager.queries.forEach((q, id) => {
      queries.push({
        id: String(id),
        operationName: q.document && q.document.definitions && q.document.definitions[0] && q.document.definitions[0].name
          ? q.document.definitions[0].name.value : null,
        variables: __mcp.safe(q.variables, 4),
        networkStatus: q.networkStatus
      });
    });
  }
  return { queries, count: queries.length };
}"#;

fn with_client(script: &str) -> String {
    script.replace("__FIND_CLIENT__", FIND_CLIENT)
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GetCacheArgs {
    /// Only entries with this `__typename`
    #[serde(default)]
    pub typename: Option<String>,
    #[serde(default = "super::default_limit")]
    pub limit: usize,
}

pub struct ApolloProvider {
    tools: Vec<RegisteredTool>,
}

impl ApolloProvider {
    pub fn new(client: Arc<CdpClient>) -> Self {
        let tools = ToolSet::new(client)
            .add(
                "apollo_get_cache",
                "Extract the Apollo Client normalized cache",
                |client, args: GetCacheArgs, session| async move {
                    Script::function(
                        &with_client(GET_CACHE),
                        &json!({ "typename": args.typename, "limit": args.limit }),
                    )
                    .context("Error reading Apollo cache")
                    .library("Apollo Client")
                    .run(&client, &session)
                    .await
                },
            )
            .add(
                "apollo_get_queries",
                "List Apollo Client's active queries",
                |client, _args: NoArgs, session| async move {
                    Script::function(&with_client(GET_QUERIES), &json!({}))
                        .context("Error listing queries")
                        .library("Apollo Client")
                        .run(&client, &session)
                        .await
                },
            )
            .build();

        Self { tools }
    }
}

tool_provider!(ApolloProvider, "apollo");
