//! Basic example demonstrating GET and POST requests with typed data.
//!
//! This example shows how to:
//! - Create a client with a base URL
//! - Fill path parameters and query strings
//! - Declare a route schema that validates the response
//! - Branch on success and failure values
//!
//! Run with: `cargo run --example basic_fetch`

use serde::{Deserialize, Serialize};
use typed_fetch::url::Params;
use typed_fetch::{Client, Error, FetchResult, FetchSchema, RequestOptions, Schema, SerdeSchema};

#[derive(Debug, Serialize, Deserialize)]
#[allow(dead_code)]
struct Post {
    #[serde(rename = "userId")]
    user_id: u32,
    id: u32,
    title: String,
    body: String,
}

#[derive(Debug, Serialize)]
struct NewPost {
    title: String,
    body: String,
    #[serde(rename = "userId")]
    user_id: u32,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter("typed_fetch=debug,basic_fetch=info")
        .init();

    let schema = Schema::new().route(
        "/posts/:id",
        FetchSchema::new().output(SerdeSchema::<Post>::shared()),
    );
    let client = Client::builder()
        .base_url("https://jsonplaceholder.typicode.com")?
        .schema(schema)
        .build()?;

    println!("=== GET Request Example ===");
    let options = RequestOptions::new().with_params(Params::positional(["1"]));
    if let Some(response) = client.get("/posts/:id", options).await?.into_response() {
        let response = response.json::<Post>()?;
        println!("Post ID: {}", response.data.id);
        println!("Title: {}", response.data.title);
        println!("Request latency: {:?}", response.latency);
        println!("Status code: {}", response.status);
    }
    println!();

    println!("=== Query Example ===");
    let options = RequestOptions::new().with_query("userId", 1);
    match client.get("/posts", options).await? {
        FetchResult::Success(response) => {
            let posts = response.json::<Vec<Post>>()?;
            println!("User 1 has {} posts", posts.data.len());
        }
        FetchResult::Failure(error) => println!("Lookup failed: {:?}", error),
    }
    println!();

    println!("=== POST Request Example ===");
    let new_post = NewPost {
        title: "My New Post".to_string(),
        body: "This is the content of my new post!".to_string(),
        user_id: 1,
    };
    match client.post("/posts", &new_post, RequestOptions::new()).await? {
        FetchResult::Success(response) => {
            println!("Content-Type: {:?}", response.header("content-type"));
            println!("Was retried: {}", response.was_retried());
            println!("Created: {:?}", response.data);
        }
        FetchResult::Failure(error) => println!("Create failed: {:?}", error),
    }
    println!();

    println!("=== Error As Value Example ===");
    match client.get("/does-not-exist", RequestOptions::new()).await? {
        FetchResult::Success(_) => println!("Unexpected success"),
        FetchResult::Failure(error) => {
            if let Some(http) = error.as_http() {
                println!("HTTP {} {}", http.status, http.status_text);
            }
        }
    }

    Ok(())
}
