use async_trait::async_trait;
use axum::{
    extract::{FromRequest, FromRequestParts, Query, Request},
    Json,
};
use http::request::Parts;
use serde::de::DeserializeOwned;
use validator::Validate;

use signet_slo::errors;

/// Json extractor that also runs the payload's validation rules.
#[derive(Debug)]
pub struct Valid<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for Valid<Json<T>>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = errors::WithBacktrace;

    async fn from_request(
        req: Request,
        state: &S,
    ) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|err| errors::bad_request(&err))?;
        value
            .validate()
            .map_err(|err| errors::Code::Validates(err))?;
        Ok(Valid(Json(value)))
    }
}

// query strings carry user input too, so they pass the same gate
#[async_trait]
impl<S, T> FromRequestParts<S> for Valid<Query<T>>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = errors::WithBacktrace;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &S,
    ) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state)
            .await
            .map_err(|err| errors::bad_request(&err))?;
        value
            .validate()
            .map_err(|err| errors::Code::Validates(err))?;
        Ok(Valid(Query(value)))
    }
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Deserialize, Validate)]
    struct Filter {
        #[validate(range(min = 1))]
        limit: u64,
    }

    fn parts(uri: &str) -> Parts {
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        req.into_parts().0
    }

    #[tokio::test]
    async fn query_values_are_validated() {
        let mut bad = parts("/keys?limit=0");
        assert!(Valid::<Query<Filter>>::from_request_parts(&mut bad, &())
            .await
            .is_err());

        let mut good = parts("/keys?limit=5");
        let Valid(Query(filter)) =
            Valid::<Query<Filter>>::from_request_parts(&mut good, &())
                .await
                .unwrap();
        assert_eq!(filter.limit, 5);
    }
}
