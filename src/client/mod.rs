pub mod catalog;
pub mod modman;
pub mod openai;

pub use catalog::{select_model, CatalogClient, CatalogError, CatalogModel};
pub use modman::{DeploymentClient, HttpDeploymentClient, ModmanError};
pub use openai::{
    ChatCompletionRequest, ChatCompletionResponse, Choice, ClientError, Message, OpenAiClient,
    OpenAiClientTrait,
};
