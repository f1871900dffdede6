mod nested_request_test;
mod pagination_test;

use std::sync::Arc;

use media_finder::{
    ExecutionContext, GenericRequest, MediaFinder, ObjectTemplate, PaginationType,
    RequestHandler, ResponseDetails, Secrets, Source, Template, Value, action,
    eval::EvalError,
    helpers::guess_media_info_from_url,
    hooks::LOAD_URL,
    request::Cursor,
};

use super::{CDN_BASE, SOURCE_ID};

pub const LAST_PAGE: i64 = 3;

fn request_echo() -> Template {
    action(|ctx: ExecutionContext| async move { Ok(ctx.request_value()) }).into()
}

fn page_fetch_limit_reached() -> Template {
    action(|ctx: ExecutionContext| async move {
        Ok(match ctx.page_fetch_limit_reached() {
            Some(reached) => Value::from(reached),
            None => ctx.exclude_field(),
        })
    })
    .into()
}

/// Two images per page, fanned out with array_map.
fn media_item() -> Template {
    ObjectTemplate::new()
        .array_map(action(|ctx: ExecutionContext| async move { Ok(ctx.get("items")?) }))
        .field(
            "id",
            action(|ctx: ExecutionContext| async move {
                let url = ctx.current()?.to_string();
                Ok(url.rsplit('/').next().unwrap_or_default().to_string())
            }),
        )
        .field(
            "url",
            action(|ctx: ExecutionContext| async move {
                ctx.run_hook(LOAD_URL, ctx.current()?).await
            }),
        )
        .field(
            "mimeType",
            action(|ctx: ExecutionContext| async move {
                let url = ctx.current()?.to_string();
                let info = guess_media_info_from_url(&url, Default::default())?;
                Ok(info.get("mimeType").cloned())
            }),
        )
        .field(
            "mediaFinderSource",
            action(|ctx: ExecutionContext| async move { Ok(ctx.source_id().to_string()) }),
        )
        .into()
}

pub fn search_handler() -> RequestHandler {
    RequestHandler::new("search", "Search")
        .pagination(PaginationType::Offset)
        .request_default("pageNumber", 1)
        .request_default("query", "cats")
        .response(ResponseDetails::new(
            ObjectTemplate::new()
                .setup(action(|ctx: ExecutionContext| async move {
                    let page = ctx.request().page_number.unwrap_or(1);
                    let items: Vec<Value> = (1..=2)
                        .map(|n| Value::from(format!("{}/{}-{}.jpg", *CDN_BASE, page, n)))
                        .collect();
                    ctx.set("items", items);
                    Ok(())
                }))
                .field(
                    "page",
                    Template::object()
                        .field("paginationType", "offset")
                        .field(
                            "pageNumber",
                            action(|ctx: ExecutionContext| async move {
                                Ok(ctx.request().page_number.unwrap_or(1))
                            }),
                        )
                        .field(
                            "isLastPage",
                            action(|ctx: ExecutionContext| async move {
                                Ok(ctx.request().page_number.unwrap_or(1) >= LAST_PAGE)
                            }),
                        )
                        .field("pageFetchLimitReached", page_fetch_limit_reached()),
                )
                .field("media", Template::list([media_item()]))
                .field("request", request_echo()),
        ))
}

pub fn feed_handler() -> RequestHandler {
    RequestHandler::new("feed", "Feed")
        .pagination(PaginationType::Cursor)
        .response(ResponseDetails::new(
            Template::object()
                .field(
                    "page",
                    Template::object()
                        .field("paginationType", "cursor")
                        .field(
                            "cursor",
                            action(|ctx: ExecutionContext| async move {
                                Ok(Value::from(ctx.request().cursor))
                            }),
                        )
                        .field(
                            "nextCursor",
                            action(|ctx: ExecutionContext| async move {
                                let next = match ctx.request().cursor {
                                    None => Some(Cursor::from("b")),
                                    Some(Cursor::Text(c)) if c == "b" => Some(Cursor::from("c")),
                                    Some(_) => None,
                                };
                                Ok(Value::from(next))
                            }),
                        )
                        .field(
                            "isLastPage",
                            action(|ctx: ExecutionContext| async move {
                                Ok(ctx.request().cursor == Some(Cursor::from("c")))
                            }),
                        )
                        .field("pageFetchLimitReached", page_fetch_limit_reached()),
                )
                .field("media", Template::list([]))
                .field("request", request_echo()),
        ))
}

pub fn private_handler() -> RequestHandler {
    RequestHandler::new("private", "Private")
        .secret("apiKey", true)
        .response(ResponseDetails::new(
            Template::object()
                .field(
                    "media",
                    Template::list([Template::object()
                        .field("id", "private-1")
                        .field(
                            "url",
                            action(|ctx: ExecutionContext| async move {
                                let key = ctx
                                    .secret("apiKey")
                                    .ok_or_else(|| EvalError::action("apiKey missing"))?;
                                Ok(format!("{}/private.png?key={}", *CDN_BASE, key))
                            }),
                        )
                        .field("mediaFinderSource", SOURCE_ID)
                        .into()]),
                )
                .field("request", request_echo()),
        ))
}

/// Returns the first page of `search` as its own media.
pub fn digest_handler(search: Arc<RequestHandler>) -> RequestHandler {
    RequestHandler::new("digest", "Digest").response(ResponseDetails::new(
        Template::object()
            .field(
                "media",
                action(move |ctx: ExecutionContext| {
                    let search = search.clone();
                    async move {
                        let response = ctx
                            .load_request(search, GenericRequest::new("", ""), Secrets::new())
                            .await?;
                        Ok(Value::from(response.media))
                    }
                }),
            )
            .field("request", request_echo()),
    ))
}

pub fn broken_handler() -> RequestHandler {
    RequestHandler::new("broken", "Broken").response(ResponseDetails::new(
        Template::object()
            .field(
                "media",
                Template::list([ObjectTemplate::new()
                    .array_map(action(|_| async { Ok(Value::from(vec![Value::from(1), Value::from(2)])) }))
                    .field(
                        "url",
                        action(|ctx: ExecutionContext| async move {
                            match ctx.current()?.as_i64() {
                                Some(2) => Err(EvalError::action("upstream returned 500")),
                                _ => Ok(Value::from("https://cdn.example.com/1.jpg")),
                            }
                        }),
                    )
                    .into()]),
            )
            .field("request", request_echo()),
    ))
}

pub fn example_source() -> Source {
    let search = Arc::new(search_handler());
    let mut source = Source::new(SOURCE_ID, "Example")
        .description("Fixture source")
        .handler(feed_handler())
        .handler(private_handler())
        .handler(digest_handler(search.clone()))
        .handler(broken_handler());
    source.request_handlers.push(search);
    source
}

pub fn finder() -> MediaFinder {
    let mut finder = MediaFinder::new();
    finder.load_source(example_source());
    finder
}
