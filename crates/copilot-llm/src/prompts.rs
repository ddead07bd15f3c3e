//! Prompt templates: a system instruction followed by few-shot examples.

use serde_json::json;

use copilot_config::PromptMessageSpec;
use copilot_core::assembler::{count_message_tokens, TokenCounter};
use copilot_core::types::Role;

use crate::llm::ChatMessage;

/// Ordered messages sent ahead of the conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    messages: Vec<ChatMessage>,
}

impl PromptTemplate {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self { messages }
    }

    /// Template holding a single system instruction.
    pub fn system_only(instruction: impl Into<String>) -> Self {
        Self::new(vec![ChatMessage::system(instruction)])
    }

    /// Use the configured override when present, else `default`.
    pub fn from_spec(spec: Option<&[PromptMessageSpec]>, default: PromptTemplate) -> Self {
        let Some(spec) = spec else {
            return default;
        };
        let messages = spec
            .iter()
            .map(|m| {
                let role = match m.role.as_str() {
                    "system" => Role::System,
                    "assistant" => Role::Assistant,
                    _ => Role::User,
                };
                ChatMessage::new(role, m.content.clone())
            })
            .collect();
        Self::new(messages)
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Estimated tokens the template occupies in every request.
    pub fn token_cost(&self, counter: &dyn TokenCounter) -> usize {
        count_message_tokens(counter, self.messages.iter().map(|m| m.content.as_str()))
    }
}

/// Built-in templates for the three generative tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptSet {
    pub generate_scenario: PromptTemplate,
    pub split_task: PromptTemplate,
    pub check_similarity: PromptTemplate,
}

impl Default for PromptSet {
    fn default() -> Self {
        Self {
            generate_scenario: default_generate_scenario(),
            split_task: default_split_task(),
            check_similarity: default_check_similarity(),
        }
    }
}

impl PromptSet {
    pub fn from_config(config: &copilot_config::PromptsConfig) -> Self {
        Self {
            generate_scenario: PromptTemplate::from_spec(
                config.generate_scenario.as_deref(),
                default_generate_scenario(),
            ),
            split_task: PromptTemplate::from_spec(config.split_task.as_deref(), default_split_task()),
            check_similarity: PromptTemplate::from_spec(
                config.check_similarity.as_deref(),
                default_check_similarity(),
            ),
        }
    }
}

pub fn default_generate_scenario() -> PromptTemplate {
    let system = "You are an assistant who guides others to use Azure CLI and only provides advice on Azure CLI commands or command combinations.\n\
You can complete the task in four steps:\n\
1. Parse the task that the user wants to accomplish. If it cannot be completed with CLI commands, answer 'Sorry, this question is out of my scope' and stop.\n\
2. Determine how many commands are needed to complete the task.\n\
3. Confirm the resource name on request.\n\
4. If only one command is needed, output an example of that command. If multiple commands are required, output an example of each command in order.\n\
When the user requests a random resource name, name the resource in the format chatgpt-<resource type in lower case>-<current timestamp>.\n\
All output must be a single JSON object in the format of the following examples, with a 'scenario' property naming the script, a 'description' property briefly describing what it does, and a 'commandSet' property containing every command with its arguments, reason and example.";

    let function_app = json!({
        "scenario": "Create an Azure Function that connects to an Azure Storage",
        "description": "Create a function app backed by a storage account and wire the connection string into its settings.",
        "commandSet": [
            {
                "command": "az storage account create",
                "arguments": ["--name", "--location", "--resource-group", "--sku"],
                "reason": "Create an Azure storage account in the resource group.",
                "example": "az storage account create --name $storage --location $location --resource-group $resourceGroup --sku $skuStorage"
            },
            {
                "command": "az functionapp create",
                "arguments": ["--name", "--resource-group", "--storage-account", "--consumption-plan-location", "--functions-version"],
                "reason": "Create a serverless function app in the resource group.",
                "example": "az functionapp create --name $functionApp --resource-group $resourceGroup --storage-account $storage --consumption-plan-location $location --functions-version $functionsVersion"
            },
            {
                "command": "az storage account show-connection-string",
                "arguments": ["--name", "--resource-group", "--query", "--output"],
                "reason": "Get the storage account connection string.",
                "example": "az storage account show-connection-string --name $storage --resource-group $resourceGroup --query connectionString --output tsv"
            },
            {
                "command": "az functionapp config appsettings set",
                "arguments": ["--name", "--resource-group", "--settings"],
                "reason": "Update function app settings to connect to the storage account.",
                "example": "az functionapp config appsettings set --name $functionApp --resource-group $resourceGroup --settings StorageConStr=$connstr"
            }
        ]
    });
    let resource_group = json!({
        "scenario": "Create a Resource Group",
        "description": "Create a resource group by defining group name and location.",
        "commandSet": [
            {
                "command": "az group create",
                "arguments": ["--name", "--location"],
                "reason": "Create a resource group",
                "example": "az group create --name chatgpt-resourcegroup-1682324585 --location $location"
            }
        ]
    });

    PromptTemplate::new(vec![
        ChatMessage::system(system),
        ChatMessage::user("How to Create an Azure Function that connects to an Azure Storage"),
        ChatMessage::assistant(function_app.to_string()),
        ChatMessage::user("Please help me create a resource group with random resource name"),
        ChatMessage::assistant(resource_group.to_string()),
    ])
}

pub fn default_split_task() -> PromptTemplate {
    let system = "You are an assistant who breaks down a user question into step descriptions and matching Azure CLI commands. Complete the task with the following steps:\n\
1. Determine whether the question can be completed by a set of Azure CLI commands. If not, output an empty array [] and end this task.\n\
2. Analyze the steps related to Azure CLI commands in this question and make sure each step corresponds to a single Azure CLI command.\n\
3. Output a description for each step without meaningless conjunctions. If a step can be completed by an Azure CLI command that you know, append the command and its parameters after the description, using \"||\" as the separator.\n\
4. Ignore steps made of general Azure CLI commands unrelated to the question's scenario (such as 'az group create', 'az login').\n\
5. Ignore steps using commands that do not start with \"az\" (such as docker, bash and kubectl commands).\n\
6. Ignore steps unrelated to Azure CLI commands.\n\
7. If the question requires many steps, keep at most the 8 most important ones.\n\
Finally, output the result as a JSON array of strings.";

    let example = json!([
        "Create an Azure Function app||az functionapp create --name --resource-group --storage-account --consumption-plan-location --functions-version",
        "Create a Qumulo Storage account",
        "Show a connection string for storage account||az storage account show-connection-string --name --resource-group --query --output",
        "Add connection string to Azure Function settings||az functionapp config appsettings set --name --resource-group --settings"
    ]);

    PromptTemplate::new(vec![
        ChatMessage::system(system),
        ChatMessage::user("How to create an Azure Function that connects to an Qumulo Storage?"),
        ChatMessage::assistant(example.to_string()),
    ])
}

pub fn default_check_similarity() -> PromptTemplate {
    let system = "Given a question and a description, decide whether the content of the question is fully consistent with the description:\n\
1. Check whether the question is semantically consistent with the description. If not, output False and stop.\n\
2. Identify the resources in the question and in the description, and the operations applied to each resource.\n\
3. If the resources, the operations and the pairing between them are the same or very close, output True, otherwise output False.";
    PromptTemplate::new(vec![
        ChatMessage::system(system),
        ChatMessage::user("question: How to create a VM snapshot from VM image.\ndescription: Tutorial to create a VM image from an existing VM."),
        ChatMessage::assistant("False"),
        ChatMessage::user("question: I want to create a VM snapshot from VM image, could you give some suggestion?\ndescription: Tutorial to create a VM snapshot from an existing VM image."),
        ChatMessage::assistant("True"),
    ])
}
