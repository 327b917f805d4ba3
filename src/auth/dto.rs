use serde::{Deserialize, Serialize};

/// Request body for registration.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignUpRequest {
    pub login: String,
    pub full_name: String,
    pub email: String,
    pub password: String,
}

/// Request body for sign in.
#[derive(Debug, Deserialize)]
pub struct SignInRequest {
    pub login: String,
    pub password: String,
}

/// Response returned after sign in.
#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_up_request_uses_camel_case() {
        let req: SignUpRequest = serde_json::from_str(
            r#"{"login":"alice","fullName":"Alice L","email":"a@b.c","password":"secret1"}"#,
        )
        .unwrap();
        assert_eq!(req.full_name, "Alice L");
    }
}
