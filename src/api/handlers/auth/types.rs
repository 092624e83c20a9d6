//! Request types for auth endpoints.

use crate::store::Gender;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SignUpRequest {
    pub email: String,
    pub password: String,
    pub name: String,
    pub age: i32,
    pub gender: Gender,
    #[serde(default)]
    pub profile_image: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone)]
pub struct SignInRequest {
    pub email: String,
    pub password: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[test]
    fn sign_up_request_accepts_lowercase_gender_and_optional_image() -> Result<()> {
        let request: SignUpRequest = serde_json::from_str(
            r#"{"email":"a@b.c","password":"pw","name":"Ada","age":36,"gender":"female"}"#,
        )?;
        assert_eq!(request.gender, Gender::Female);
        assert_eq!(request.profile_image, None);

        let value = serde_json::to_value(&request)?;
        assert_eq!(value["gender"], "FEMALE");
        assert!(value.get("profileImage").is_some());
        Ok(())
    }

    #[test]
    fn sign_up_request_rejects_unknown_gender() {
        let result = serde_json::from_str::<SignUpRequest>(
            r#"{"email":"a@b.c","password":"pw","name":"Ada","age":36,"gender":"x"}"#,
        );
        assert!(result.is_err());
    }
}
